//! The engine contract `PatternCache` compiles patterns through.
//!
//! The actual regex engine is out of scope for this crate; what matters for
//! the cache is only that compilation is expensive and sizeable. This module
//! defines the contract ([`Engine`]) and ships one concrete, non-fabricated
//! implementation ([`StdRegexEngine`]) over the `regex` crate so the cache
//! has something real to compile and test against.

use regex::{Regex, RegexBuilder};

use crate::error::{CompileError, CompileErrorKind};
use crate::options::Options;

/// Something that can turn pattern text plus [`Options`] into a compiled,
/// matchable artifact, and report that artifact's approximate size.
///
/// Implementations must be safe to share across threads: a single `Engine`
/// instance compiles on behalf of every caller of a [`PatternCache`].
///
/// [`PatternCache`]: crate::pattern_cache::PatternCache
pub trait Engine: Send + Sync {
    /// The compiled, matchable program this engine produces.
    type Artifact: Send + Sync;

    /// Compiles `text` under `options`.
    fn compile(&self, text: &str, options: &Options) -> Result<Self::Artifact, CompileError>;

    /// An approximation, in bytes, of the compiled artifact's footprint.
    /// Used only for capacity accounting; need not be exact.
    fn program_size(&self, artifact: &Self::Artifact) -> usize;
}

/// An [`Engine`] backed by the `regex` crate.
///
/// Several [`Options`] fields have no equivalent in `regex`'s public API
/// (`posix_syntax`, `never_newline`, `never_capture`, `perl_classes`,
/// `word_boundary`, `one_line`, `log_errors`, and `Encoding::Latin1`); they
/// are still part of the cache key (accepted, hashed, compared) but are not
/// honored by this particular engine. `program_size` has no introspection
/// point in `regex`'s public API either, so it returns a heuristic derived
/// from the pattern's length rather than a true program size.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdRegexEngine;

impl Engine for StdRegexEngine {
    type Artifact = Regex;

    fn compile(&self, text: &str, options: &Options) -> Result<Self::Artifact, CompileError> {
        let pattern = if options.literal {
            regex::escape(text)
        } else {
            text.to_string()
        };

        let mut builder = RegexBuilder::new(&pattern);
        builder
            .case_insensitive(!options.case_sensitive)
            .dot_matches_new_line(options.dot_matches_newline)
            .multi_line(!options.one_line);

        if options.max_mem > 0 {
            builder.size_limit(options.max_mem as usize);
        }

        builder.build().map_err(|e| map_regex_error(e, text))
    }

    fn program_size(&self, artifact: &Self::Artifact) -> usize {
        // `regex` does not expose its compiled program's byte size. The
        // pattern's textual length is a stand-in, scaled by a constant
        // factor representative of typical automaton expansion.
        artifact.as_str().len().max(1) * 16
    }
}

fn map_regex_error(err: regex::Error, text: &str) -> CompileError {
    match &err {
        regex::Error::Syntax(msg) => {
            CompileError::new(CompileErrorKind::Syntax, msg.clone()).with_offending(text.to_string())
        }
        regex::Error::CompiledTooBig(limit) => CompileError::new(
            CompileErrorKind::ResourceLimit,
            format!("compiled program would exceed {limit} bytes"),
        ),
        other => CompileError::new(CompileErrorKind::Internal, other.to_string()),
    }
}
