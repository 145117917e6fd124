//! The options bundle that, together with pattern text, identifies a
//! compiled automaton.

/// Text encoding the engine should assume for both the pattern and any
/// input matched against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

/// Compilation and matching options for a single pattern.
///
/// Two patterns compiled with the same text but different options are
/// distinct cache entries: every field here participates in the pattern
/// cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Options {
    /// Soft upper bound, in bytes, on the compiled program's size.
    pub max_mem: u64,
    pub encoding: Encoding,
    pub posix_syntax: bool,
    pub longest_match: bool,
    pub log_errors: bool,
    /// Treat the pattern text as a literal string rather than a regex.
    pub literal: bool,
    pub never_newline: bool,
    pub dot_matches_newline: bool,
    pub never_capture: bool,
    pub case_sensitive: bool,
    pub perl_classes: bool,
    pub word_boundary: bool,
    pub one_line: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_mem: 8 << 20,
            encoding: Encoding::default(),
            posix_syntax: false,
            longest_match: false,
            log_errors: true,
            literal: false,
            never_newline: false,
            dot_matches_newline: false,
            never_capture: false,
            case_sensitive: true,
            perl_classes: true,
            word_boundary: true,
            one_line: false,
        }
    }
}
