//! Special-token literals, policies, and the literal matcher.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Input, MatchKind};
use rustc_hash::{FxHashMap, FxHashSet};

use super::error::TokenizerError;
use super::Rank;

/// Caller policy for one side of special-token handling.
///
/// `encode` takes two of these: which specials may be encoded to their
/// reserved IDs (`allowed`), and which must fail the call when present in the
/// input (`disallowed`). A literal in neither resolved set is treated as
/// ordinary text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpecialTokenSet {
    /// No special tokens.
    #[default]
    None,
    /// Every special token registered on the encoder.
    All,
    /// Exactly the named literals.
    Only(FxHashSet<String>),
    /// As `allowed`: nothing. As `disallowed`: everything not allowed.
    Automatic,
}

impl SpecialTokenSet {
    /// Convenience constructor for `Only` from string literals.
    pub fn only<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SpecialTokenSet::Only(literals.into_iter().map(Into::into).collect())
    }
}

/// The two policies resolved against a concrete special-token vocabulary.
pub(crate) struct ResolvedPolicy<'a> {
    pub allowed: FxHashSet<&'a str>,
    pub disallowed: FxHashSet<&'a str>,
}

impl<'a> ResolvedPolicy<'a> {
    /// Resolve both policies against the registered literals.
    ///
    /// The resulting sets borrow from `specials` only, never from the policy
    /// values: an `Only` entry that names an unregistered literal is dropped,
    /// which cannot change behavior because unregistered literals never match
    /// at a cursor.
    pub(crate) fn resolve(
        specials: &'a FxHashMap<String, Rank>,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Self {
        let all = || specials.keys().map(String::as_str).collect::<FxHashSet<_>>();
        let registered_subset = |set: &FxHashSet<String>| {
            specials
                .keys()
                .filter(|lit| set.contains(*lit))
                .map(String::as_str)
                .collect::<FxHashSet<_>>()
        };
        let allowed = match allowed {
            SpecialTokenSet::None | SpecialTokenSet::Automatic => FxHashSet::default(),
            SpecialTokenSet::All => all(),
            SpecialTokenSet::Only(set) => registered_subset(set),
        };
        let disallowed = match disallowed {
            SpecialTokenSet::None => FxHashSet::default(),
            SpecialTokenSet::All => all(),
            SpecialTokenSet::Only(set) => registered_subset(set),
            SpecialTokenSet::Automatic => {
                let mut rest = all();
                rest.retain(|lit| !allowed.contains(lit));
                rest
            }
        };
        Self { allowed, disallowed }
    }
}

/// Literal matcher over the registered special tokens.
///
/// Two query shapes: an anchored probe at a cursor (literals checked in
/// descending length order) and an earliest-next-occurrence scan (automaton,
/// leftmost match).
#[derive(Debug)]
pub(crate) struct SpecialMatcher {
    encode: FxHashMap<String, Rank>,
    decode: FxHashMap<Rank, String>,
    /// Literals sorted by descending length, then lexicographically.
    by_length: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl SpecialMatcher {
    pub(crate) fn new(encode: FxHashMap<String, Rank>) -> Result<Self, TokenizerError> {
        let decode: FxHashMap<Rank, String> =
            encode.iter().map(|(k, &v)| (v, k.clone())).collect();
        let mut by_length: Vec<String> = encode.keys().cloned().collect();
        by_length.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let automaton = if by_length.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&by_length)?,
            )
        };
        Ok(Self {
            encode,
            decode,
            by_length,
            automaton,
        })
    }

    pub(crate) fn id_of(&self, literal: &str) -> Option<Rank> {
        self.encode.get(literal).copied()
    }

    pub(crate) fn literal_of(&self, id: Rank) -> Option<&str> {
        self.decode.get(&id).map(String::as_str)
    }

    pub(crate) fn encode_map(&self) -> &FxHashMap<String, Rank> {
        &self.encode
    }

    pub(crate) fn max_id(&self) -> Option<Rank> {
        self.decode.keys().copied().max()
    }

    pub(crate) fn len(&self) -> usize {
        self.encode.len()
    }

    /// Literals that start exactly at `cursor`, longest first.
    pub(crate) fn candidates_at<'a>(
        &'a self,
        text: &'a str,
        cursor: usize,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let rest = &text[cursor..];
        self.by_length
            .iter()
            .map(String::as_str)
            .filter(move |lit| rest.starts_with(lit))
    }

    /// Byte offset of the earliest special-token occurrence at or after
    /// `from`, regardless of policy.
    pub(crate) fn next_occurrence(&self, text: &str, from: usize) -> Option<usize> {
        let automaton = self.automaton.as_ref()?;
        automaton
            .find(Input::new(text).range(from..))
            .map(|m| m.start())
    }
}
