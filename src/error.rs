//! Error types surfaced at the crate's two fallible boundaries: pattern
//! compilation and configuration validation.

use thiserror::Error;

/// Coarse classification of why an engine failed to compile a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// The pattern text is not valid syntax for the engine.
    Syntax,
    /// Compilation would exceed a resource limit (e.g. `Options::max_mem`).
    ResourceLimit,
    /// Any other engine-internal failure.
    Internal,
}

impl std::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompileErrorKind::Syntax => "syntax error",
            CompileErrorKind::ResourceLimit => "resource limit exceeded",
            CompileErrorKind::Internal => "internal engine error",
        };
        f.write_str(s)
    }
}

/// An engine's compilation failure, propagated unchanged by `PatternCache`.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    /// The substring of the pattern the engine points to, if it reports one.
    pub offending: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offending: None,
        }
    }

    pub fn with_offending(mut self, offending: impl Into<String>) -> Self {
        self.offending = Some(offending.into());
        self
    }
}

/// A configuration value that failed validation.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration field `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
