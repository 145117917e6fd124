//! The single background thread that periodically sweeps all three tiers.
//!
//! The teacher evicts synchronously, inline on insert. This crate instead
//! runs eviction off the hot path on a dedicated thread, in the shape shown
//! by `other_examples/2e7ad9a2_saviornt-NexusLite__src-cache.rs.rs`'s
//! `thread::spawn` + sleep loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::handle::now_ticks;

/// Owns the background sweeper thread. `start`/`stop` are both idempotent:
/// calling `start` while already running, or `stop` while already stopped,
/// is a no-op.
pub struct EvictionLoop {
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Starts the sweeper thread if it isn't already running. `sweep` is
    /// called with the current tick on every interval; it is expected to
    /// run the Result → Pattern → Deferred eviction order and isolate
    /// faults per tier itself (see `CacheManager::sweep_once`).
    pub fn start(&self, mut sweep: impl FnMut(u64) + Send + 'static) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        self.stop_flag.store(false, Ordering::Release);
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval = self.interval;

        let join = thread::spawn(move || loop {
            thread::sleep(interval);
            if stop_flag.load(Ordering::Acquire) {
                break;
            }
            sweep(now_ticks());
        });
        *guard = Some(join);
    }

    /// Signals the sweeper thread to stop and joins it. Blocks until the
    /// thread has exited its current sweep.
    pub fn stop(&self) {
        let mut guard = self.handle.lock();
        let Some(join) = guard.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::Release);
        let _ = join.join();
    }

    pub fn running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for EvictionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
