//! Regex-driven segmentation of ordinary text.
//!
//! The built-in patterns use Unicode property classes and the `\s+(?!\S)`
//! look-ahead, so the default backend is fancy-regex; an optional PCRE2
//! backend (JIT) can be swapped in behind the same interface.

use crate::core::error::TokenizerError;

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

/// Regex backend for ordinary-text segmentation.
#[derive(Debug)]
pub(crate) enum RegexBackend {
    Fancy(Box<fancy_regex::Regex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

impl RegexBackend {
    pub(crate) fn fancy(pattern: &str) -> Result<Self, TokenizerError> {
        Ok(RegexBackend::Fancy(Box::new(fancy_regex::Regex::new(
            pattern,
        )?)))
    }

    #[cfg(feature = "pcre2")]
    pub(crate) fn pcre2(pattern: &str) -> Result<Self, TokenizerError> {
        let mut builder = pcre2::bytes::RegexBuilder::new();
        builder.jit_if_available(true);
        builder.utf(true);
        builder.ucp(true);
        Ok(RegexBackend::Pcre2(builder.build(pattern)?))
    }

    /// Non-overlapping left-to-right match ranges over `text`, as byte
    /// offsets. Matches the backend fails on at runtime are skipped.
    pub(crate) fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            RegexBackend::Fancy(regex) => regex
                .find_iter(text)
                .filter_map(|m| m.ok())
                .map(|m| (m.start(), m.end()))
                .collect(),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => regex
                .find_iter(text.as_bytes())
                .filter_map(|m| m.ok())
                .map(|m| (m.start(), m.end()))
                .collect(),
        }
    }
}
