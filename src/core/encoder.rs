//! The encoder instance and its pipeline.
//!
//! One [`Encoder`] binds a compiled segmentation regex, a rank table, and a
//! special-token vocabulary. It is immutable after construction (the LRU
//! chunk cache is the only interior mutability) and safe to share across
//! threads.
//!
//! Four encoding modes run over the same cursor scanner:
//! plain [`encode`](Encoder::encode), counting
//! [`token_count`](Encoder::token_count), completion-aware
//! [`encode_with_unstable`](Encoder::encode_with_unstable), and the chunked
//! [`stream`](Encoder::stream).

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Mutex;

use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use super::bpe::{byte_pair_count, byte_pair_encode};
use super::error::TokenizerError;
use super::rank::RankTable;
use super::segment::RegexBackend;
use super::special::{ResolvedPolicy, SpecialMatcher, SpecialTokenSet};
use super::stream::TokenStream;
use super::Rank;

/// Default capacity of the per-encoder chunk cache.
const DEFAULT_CACHE_SIZE: usize = 4096;

/// One step of the cursor scan over the input text.
pub(crate) enum Step<'a> {
    /// A run of ordinary text up to the next special token; goes through the
    /// regex segmenter.
    Ordinary(Range<usize>),
    /// A single character consumed to step past a special literal the policy
    /// neither allows nor forbids; merged directly without segmentation.
    Fragment(Range<usize>),
    /// An accepted special token.
    Special { literal: &'a str, id: Rank },
}

/// Cursor-based single-pass scanner; shared by every encoding mode.
pub(crate) struct Scanner<'a> {
    matcher: &'a SpecialMatcher,
    text: &'a str,
    policy: ResolvedPolicy<'a>,
    cursor: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn next_step(&mut self) -> Option<Result<Step<'a>, TokenizerError>> {
        let text = self.text;
        let matcher = self.matcher;
        if self.cursor >= text.len() {
            return None;
        }

        // Anchored probe, longest literal first.
        for literal in matcher.candidates_at(text, self.cursor) {
            if self.policy.disallowed.contains(literal) {
                self.cursor = text.len();
                return Some(Err(TokenizerError::DisallowedSpecial(literal.to_string())));
            }
            if self.policy.allowed.contains(literal) {
                if let Some(id) = matcher.id_of(literal) {
                    self.cursor += literal.len();
                    return Some(Ok(Step::Special { literal, id }));
                }
            }
        }

        match matcher.next_occurrence(text, self.cursor) {
            // A special starts here but the policy ignores it: consume one
            // character as ordinary text so the scan makes progress.
            Some(start) if start == self.cursor => {
                let width = text[self.cursor..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
                let range = self.cursor..self.cursor + width;
                self.cursor = range.end;
                Some(Ok(Step::Fragment(range)))
            }
            next => {
                let end = next.unwrap_or(text.len());
                let range = self.cursor..end;
                self.cursor = end;
                Some(Ok(Step::Ordinary(range)))
            }
        }
    }
}

/// A BPE encoder bound to one named encoding.
#[derive(Debug)]
pub struct Encoder {
    name: String,
    pattern: String,
    regex: RegexBackend,
    ranks: RankTable,
    specials: SpecialMatcher,
    chunk_cache: Mutex<LruCache<u64, Vec<Rank>>>,
    cache_size: usize,
    max_token: Rank,
    explicit_n_vocab: Option<u32>,
    use_pcre2: bool,
}

impl Encoder {
    /// Build an encoder from a rank map, special tokens, and a segmentation
    /// pattern.
    pub fn new(
        name: impl Into<String>,
        ranks: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::with_options(name, ranks, special_tokens, pattern, None, DEFAULT_CACHE_SIZE)
    }

    /// Build an encoder, optionally validating a declared vocabulary size.
    ///
    /// When `explicit_n_vocab` is given, the rank and special counts must sum
    /// to it and the highest token ID must be `explicit_n_vocab - 1`.
    pub fn with_options(
        name: impl Into<String>,
        ranks: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
        explicit_n_vocab: Option<u32>,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let ranks = RankTable::new(ranks);
        let specials = SpecialMatcher::new(special_tokens)?;
        let max_token = ranks
            .max_rank()
            .into_iter()
            .chain(specials.max_id())
            .max()
            .unwrap_or(0);

        if let Some(declared) = explicit_n_vocab {
            if ranks.len() + specials.len() != declared as usize
                || max_token != declared.saturating_sub(1)
            {
                return Err(TokenizerError::VocabSizeMismatch {
                    declared,
                    ranks: ranks.len(),
                    specials: specials.len(),
                    max_token,
                });
            }
        }

        let regex = RegexBackend::fancy(pattern)?;
        let cache_size = cache_size.max(1);
        let chunk_cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
        ));

        Ok(Self {
            name: name.into(),
            pattern: pattern.to_string(),
            regex,
            ranks,
            specials,
            chunk_cache,
            cache_size,
            max_token,
            explicit_n_vocab,
            use_pcre2: false,
        })
    }

    fn compile_backend(pattern: &str, use_pcre2: bool) -> Result<RegexBackend, TokenizerError> {
        if use_pcre2 {
            #[cfg(feature = "pcre2")]
            return RegexBackend::pcre2(pattern);
            #[cfg(not(feature = "pcre2"))]
            return Err(TokenizerError::Pcre2NotEnabled);
        }
        RegexBackend::fancy(pattern)
    }

    /// Switch to the PCRE2 backend (JIT) or back to the default.
    ///
    /// Errors with [`TokenizerError::Pcre2NotEnabled`] unless the crate was
    /// built with the `pcre2` feature.
    pub fn pcre2(mut self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        self.regex = Self::compile_backend(&self.pattern, use_pcre2)?;
        self.use_pcre2 = use_pcre2;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Special-token literal → ID map.
    pub fn special_tokens(&self) -> &FxHashMap<String, Rank> {
        self.specials.encode_map()
    }

    /// The rank table backing this encoder.
    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    /// Total vocabulary span: `max_token + 1`.
    pub fn n_vocab(&self) -> u32 {
        self.max_token + 1
    }

    /// Highest token ID across ranks and specials.
    pub fn max_token(&self) -> Rank {
        self.max_token
    }

    pub(crate) fn scanner<'a>(
        &'a self,
        text: &'a str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Scanner<'a> {
        Scanner {
            matcher: &self.specials,
            text,
            policy: ResolvedPolicy::resolve(self.specials.encode_map(), allowed, disallowed),
            cursor: 0,
        }
    }

    #[inline]
    fn piece_hash(piece: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        piece.hash(&mut hasher);
        hasher.finish()
    }

    /// Encode one segmenter piece, going through the chunk cache.
    pub(crate) fn encode_piece(&self, piece: &[u8]) -> Vec<Rank> {
        if let Some(rank) = self.ranks.lookup(piece) {
            return vec![rank];
        }
        let hash = Self::piece_hash(piece);
        if let Ok(mut cache) = self.chunk_cache.lock() {
            if let Some(cached) = cache.get(&hash) {
                return cached.clone();
            }
        }
        let tokens = byte_pair_encode(piece, &self.ranks);
        if let Ok(mut cache) = self.chunk_cache.lock() {
            cache.put(hash, tokens.clone());
        }
        tokens
    }

    /// Token count of one piece without materializing its tokens.
    fn count_piece(&self, piece: &[u8]) -> usize {
        if self.ranks.lookup(piece).is_some() {
            return 1;
        }
        let hash = Self::piece_hash(piece);
        if let Ok(mut cache) = self.chunk_cache.lock() {
            if let Some(cached) = cache.get(&hash) {
                return cached.len();
            }
        }
        byte_pair_count(piece, &self.ranks)
    }

    /// Regex-segment `segment` and append its tokens; returns the token count
    /// of the final piece.
    pub(crate) fn encode_segment(&self, segment: &str, out: &mut Vec<Rank>) -> usize {
        let bytes = segment.as_bytes();
        let mut last_piece_len = 0;
        for (start, end) in self.regex.find_iter(segment) {
            let tokens = self.encode_piece(&bytes[start..end]);
            last_piece_len = tokens.len();
            out.extend(tokens);
        }
        last_piece_len
    }

    /// Encode text with no special-token handling at all.
    pub fn encode_ordinary(&self, text: &str) -> Vec<Rank> {
        let mut tokens = Vec::new();
        self.encode_segment(text, &mut tokens);
        tokens
    }

    fn encode_inner(
        &self,
        text: &str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Result<(Vec<Rank>, usize), TokenizerError> {
        let mut scanner = self.scanner(text, allowed, disallowed);
        let mut tokens = Vec::new();
        let mut last_piece_token_len = 0;
        while let Some(step) = scanner.next_step() {
            match step? {
                Step::Ordinary(range) => {
                    let len = self.encode_segment(&text[range], &mut tokens);
                    if len > 0 {
                        last_piece_token_len = len;
                    }
                }
                Step::Fragment(range) => {
                    let piece = self.encode_piece(text[range].as_bytes());
                    last_piece_token_len = piece.len();
                    tokens.extend(piece);
                }
                Step::Special { id, .. } => {
                    tokens.push(id);
                    last_piece_token_len = 0;
                }
            }
        }
        Ok((tokens, last_piece_token_len))
    }

    /// Encode `text` under the given special-token policies.
    pub fn encode(
        &self,
        text: &str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Result<Vec<Rank>, TokenizerError> {
        self.encode_inner(text, allowed, disallowed).map(|(t, _)| t)
    }

    /// Encode with every registered special token allowed.
    pub fn encode_with_special_tokens(&self, text: &str) -> Vec<Rank> {
        // All/None policies cannot produce DisallowedSpecial.
        self.encode(text, &SpecialTokenSet::All, &SpecialTokenSet::None)
            .unwrap_or_default()
    }

    /// Token count of `text` without materializing token vectors for
    /// ordinary pieces.
    pub fn token_count(
        &self,
        text: &str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Result<usize, TokenizerError> {
        let mut scanner = self.scanner(text, allowed, disallowed);
        let mut count = 0;
        while let Some(step) = scanner.next_step() {
            match step? {
                Step::Ordinary(range) => {
                    let segment = &text[range];
                    let bytes = segment.as_bytes();
                    for (start, end) in self.regex.find_iter(segment) {
                        count += self.count_piece(&bytes[start..end]);
                    }
                }
                Step::Fragment(range) => count += self.count_piece(text[range].as_bytes()),
                Step::Special { .. } => count += 1,
            }
        }
        Ok(count)
    }

    /// Chunked token stream with text/special provenance tags.
    ///
    /// `chunk_size` is clamped to at least 1. The stream is lazy; dropping it
    /// abandons the scan.
    pub fn stream<'a>(
        &'a self,
        text: &'a str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
        chunk_size: usize,
    ) -> TokenStream<'a> {
        TokenStream::new(self, text, self.scanner(text, allowed, disallowed), chunk_size)
    }

    /// Whether every byte of the token's expansion is space, tab, or newline.
    fn token_is_all_space(&self, token: Rank) -> bool {
        self.ranks
            .bytes_for(token)
            .is_some_and(|bytes| bytes.iter().all(|&b| matches!(b, b' ' | b'\n' | b'\t')))
    }

    /// Whitespace-only tokens are sensitive to merges with incoming text, so
    /// widen the unstable window left across a whitespace run.
    fn extend_whitespace_run(&self, tokens: &[Rank], mut last_piece_token_len: usize) -> usize {
        if last_piece_token_len > 0
            && self.token_is_all_space(tokens[tokens.len() - last_piece_token_len])
        {
            while last_piece_token_len < tokens.len()
                && self.token_is_all_space(tokens[tokens.len() - last_piece_token_len - 1])
            {
                last_piece_token_len += 1;
            }
        }
        debug_assert!(last_piece_token_len <= tokens.len());
        last_piece_token_len
    }

    /// Encode `text`, separating the stable prefix from the set of token
    /// sequences the unstable suffix could still become.
    ///
    /// Completions are deduplicated and sorted lexicographically.
    pub fn encode_with_unstable(
        &self,
        text: &str,
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Result<(Vec<Rank>, Vec<Vec<Rank>>), TokenizerError> {
        let (mut tokens, last_piece_token_len) = self.encode_inner(text, allowed, disallowed)?;
        if last_piece_token_len == 0 {
            // Ended on a special token; nothing is unstable.
            return Ok((tokens, Vec::new()));
        }
        let last_piece_token_len = self.extend_whitespace_run(&tokens, last_piece_token_len);

        let unstable_bytes = self.decode_bytes(&tokens[tokens.len() - last_piece_token_len..]);
        tokens.truncate(tokens.len() - last_piece_token_len);
        if unstable_bytes.is_empty() {
            return Ok((tokens, Vec::new()));
        }

        let mut completions: FxHashSet<Vec<Rank>> = FxHashSet::default();

        // Single tokens that extend (or exactly match) the unstable bytes.
        for (_, rank) in self.ranks.prefix_search(&unstable_bytes) {
            completions.insert(vec![rank]);
        }

        // At every split point, graft each token that extends the suffix onto
        // the prefix and retokenize the result; the token run is cut as soon
        // as it covers the unstable bytes.
        for i in 1..unstable_bytes.len() {
            let (prefix, suffix) = unstable_bytes.split_at(i);
            for (candidate, _) in self.ranks.prefix_search(suffix) {
                let possibility = [prefix, candidate].concat();
                // Retokenizing may introduce a regex split that plain merging
                // would not see, so prefer the segmented path when the bytes
                // form valid UTF-8.
                let encoded = match std::str::from_utf8(&possibility) {
                    Ok(s) => self.encode_ordinary(s),
                    Err(_) => byte_pair_encode(&possibility, &self.ranks),
                };
                let mut seq = Vec::new();
                let mut seq_len = 0;
                for token in encoded {
                    seq.push(token);
                    seq_len += self.ranks.bytes_for(token).map_or(0, <[u8]>::len);
                    if seq_len >= unstable_bytes.len() {
                        break;
                    }
                }
                completions.insert(seq);
            }
        }

        // A trailing whitespace scalar can split off once more text arrives
        // (the \s+(?!\S) lookahead), so offer that split as a completion too.
        if unstable_bytes.len() > 1 {
            let (last_char, width) = bstr::decode_last_utf8(&unstable_bytes);
            if unstable_bytes.len() > width && last_char.is_some_and(char::is_whitespace) {
                let split = unstable_bytes.len() - width;
                let mut reencoded = byte_pair_encode(&unstable_bytes[..split], &self.ranks);
                reencoded.extend(byte_pair_encode(&unstable_bytes[split..], &self.ranks));
                completions.insert(reencoded);
            }
        }

        let mut completions: Vec<Vec<Rank>> = completions.into_iter().collect();
        completions.sort_unstable();
        Ok((tokens, completions))
    }

    /// Bytes for one token ID, special or ordinary.
    fn token_bytes(&self, token: Rank) -> Option<&[u8]> {
        self.ranks
            .bytes_for(token)
            .or_else(|| self.specials.literal_of(token).map(str::as_bytes))
    }

    /// Concatenated bytes of the tokens; unknown IDs are skipped.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Vec<u8> {
        let mut out = Vec::with_capacity(tokens.len() * 2);
        for &token in tokens {
            if let Some(bytes) = self.token_bytes(token) {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    /// Strict UTF-8 decode.
    pub fn decode(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        String::from_utf8(self.decode_bytes(tokens)).map_err(|_| TokenizerError::Utf8)
    }

    /// Decode with invalid UTF-8 replaced by U+FFFD.
    pub fn decode_lossy(&self, tokens: &[Rank]) -> String {
        String::from_utf8_lossy(&self.decode_bytes(tokens)).into_owned()
    }

    /// Decode and report, for each token, the character index where it begins
    /// in the reconstructed text.
    ///
    /// Characters are Unicode scalars counted via non-continuation UTF-8
    /// bytes; a token that starts mid-scalar attaches to the preceding one.
    pub fn decode_with_offsets(
        &self,
        tokens: &[Rank],
    ) -> Result<(String, Vec<usize>), TokenizerError> {
        let mut bytes = Vec::with_capacity(tokens.len() * 2);
        let mut offsets = Vec::with_capacity(tokens.len());
        let mut chars_seen = 0usize;
        for &token in tokens {
            let token_bytes = self
                .token_bytes(token)
                .ok_or(TokenizerError::TokenBytesNotFound(token))?;
            let starts_mid_scalar = token_bytes.first().is_some_and(|&b| b & 0xC0 == 0x80);
            offsets.push(if starts_mid_scalar {
                chars_seen.saturating_sub(1)
            } else {
                chars_seen
            });
            chars_seen += token_bytes.iter().filter(|&&b| b & 0xC0 != 0x80).count();
            bytes.extend_from_slice(token_bytes);
        }
        Ok((String::from_utf8_lossy(&bytes).into_owned(), offsets))
    }

    /// Resolve a string to exactly one token: a special literal or a rank key.
    pub fn encode_single_token(&self, piece: &str) -> Result<Rank, TokenizerError> {
        if let Some(id) = self.specials.id_of(piece) {
            return Ok(id);
        }
        self.ranks
            .lookup(piece.as_bytes())
            .ok_or_else(|| TokenizerError::SingleTokenNotFound(piece.to_string()))
    }

    /// Bytes for one token ID, or [`TokenizerError::TokenBytesNotFound`].
    pub fn decode_single_token_bytes(&self, token: Rank) -> Result<Vec<u8>, TokenizerError> {
        self.token_bytes(token)
            .map(<[u8]>::to_vec)
            .ok_or(TokenizerError::TokenBytesNotFound(token))
    }

    /// Byte expansions of every resolvable token ID in `0..=max_token`, in ID
    /// order; unassigned IDs are omitted.
    pub fn token_byte_values(&self) -> Vec<Vec<u8>> {
        (0..=self.max_token)
            .filter_map(|id| self.token_bytes(id).map(<[u8]>::to_vec))
            .collect()
    }

    /// Drop every cached chunk encoding.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.chunk_cache.lock() {
            cache.clear();
        }
    }
}

impl Clone for Encoder {
    fn clone(&self) -> Self {
        // Regexes are recompiled from the pattern and the cache starts empty.
        let regex =
            Self::compile_backend(&self.pattern, self.use_pcre2).expect("pattern compiled before");
        Self {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            regex,
            ranks: self.ranks.clone(),
            specials: SpecialMatcher::new(self.specials.encode_map().clone())
                .expect("matcher built before"),
            chunk_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(self.cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
            cache_size: self.cache_size,
            max_token: self.max_token,
            explicit_n_vocab: self.explicit_n_vocab,
            use_pcre2: self.use_pcre2,
        }
    }
}
