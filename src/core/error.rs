//! Error taxonomy for the tokenizer and the vocabulary loaders.

use thiserror::Error;

use super::Rank;

/// Errors produced while loading or synthesizing a rank map.
///
/// Loader errors prevent encoder construction but never corrupt the
/// registry; they are surfaced unchanged through [`TokenizerError::Vocab`].
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rank file not found: {0}")]
    FileNotFound(String),
    #[error("source cannot be resolved: {0}")]
    InvalidSource(String),
    #[error("invalid vocabulary data: {0}")]
    InvalidEncoding(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Errors produced by encoder construction, encoding, and the registry.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("regex compilation error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[cfg(feature = "pcre2")]
    #[error("regex compilation error (PCRE2): {0}")]
    Pcre2(#[from] pcre2::Error),
    #[error("special-token matcher build error: {0}")]
    AhoCorasick(#[from] aho_corasick::BuildError),
    #[error("vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The input contained a special-token literal the caller's policy forbids.
    #[error("text contains disallowed special token {0:?}")]
    DisallowedSpecial(String),
    /// Single-token lookup failed: the string is neither a special literal
    /// nor a rank-map key.
    #[error("no single token for {0:?}")]
    SingleTokenNotFound(String),
    /// Reverse lookup failed for a token ID.
    #[error("no bytes for token {0}")]
    TokenBytesNotFound(Rank),
    /// The declared vocabulary size disagrees with the loaded ranks/specials.
    #[error(
        "declared vocab size {declared} does not match {ranks} ranks + {specials} specials \
         (max token {max_token})"
    )]
    VocabSizeMismatch {
        declared: u32,
        ranks: usize,
        specials: usize,
        max_token: Rank,
    },
    /// Decoded bytes were not valid UTF-8 (strict decode only).
    #[error("decoded bytes are not valid UTF-8")]
    Utf8,

    #[error("unknown encoding or model: {0:?}")]
    UnknownEncoding(String),
    #[error("cannot unregister built-in encoding {0:?}")]
    BuiltinEncoding(String),
    #[error("plugin {0:?} is already loaded")]
    PluginDuplicate(String),
    #[error("no loaded plugin with id {0:?}")]
    PluginUnknown(String),
    #[error("PCRE2 backend requested but the `pcre2` feature is not enabled")]
    Pcre2NotEnabled,
}
