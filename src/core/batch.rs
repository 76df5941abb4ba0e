//! Parallel batch encode/decode.
//!
//! Results always come back in input order. The default entry points run on
//! the global rayon pool; the bounded variants build a scoped pool so callers
//! can cap worker count per operation.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use super::encoder::Encoder;
use super::error::TokenizerError;
use super::special::SpecialTokenSet;
use super::Rank;

fn worker_count(requested: usize, jobs: usize) -> usize {
    let available = std::thread::available_parallelism().map_or(1, usize::from);
    requested.min(jobs).min(available).max(1)
}

impl Encoder {
    /// Encode each text on the global worker pool; the first failure cancels
    /// the remaining work and propagates.
    pub fn encode_batch<T: AsRef<str> + Sync>(
        &self,
        texts: &[T],
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
    ) -> Result<Vec<Vec<Rank>>, TokenizerError> {
        texts
            .par_iter()
            .map(|text| self.encode(text.as_ref(), allowed, disallowed))
            .collect()
    }

    /// [`encode_batch`](Encoder::encode_batch) on a dedicated pool of at most
    /// `max_concurrency` workers (further clamped to the job count and the
    /// machine's parallelism).
    pub fn encode_batch_with_concurrency<T: AsRef<str> + Sync>(
        &self,
        texts: &[T],
        allowed: &SpecialTokenSet,
        disallowed: &SpecialTokenSet,
        max_concurrency: usize,
    ) -> Result<Vec<Vec<Rank>>, TokenizerError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count(max_concurrency, texts.len()))
            .build()?;
        pool.install(|| self.encode_batch(texts, allowed, disallowed))
    }

    /// Decode each token list in parallel. Infallible: unknown tokens are
    /// skipped and invalid UTF-8 becomes replacement characters.
    pub fn decode_batch(&self, token_lists: &[Vec<Rank>]) -> Vec<String> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode_lossy(tokens))
            .collect()
    }

    /// [`decode_batch`](Encoder::decode_batch) on a dedicated bounded pool.
    pub fn decode_batch_with_concurrency(
        &self,
        token_lists: &[Vec<Rank>],
        max_concurrency: usize,
    ) -> Result<Vec<String>, TokenizerError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count(max_concurrency, token_lists.len()))
            .build()?;
        Ok(pool.install(|| self.decode_batch(token_lists)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn encoder() -> Encoder {
        let mut ranks = FxHashMap::default();
        for b in 0u8..=255 {
            ranks.insert(vec![b], b as Rank);
        }
        let mut specials = FxHashMap::default();
        specials.insert("<|endoftext|>".to_string(), 1000);
        Encoder::new("batch-test", ranks, specials, r"\S+|\s+").unwrap()
    }

    #[test]
    fn batch_preserves_input_order() {
        let enc = encoder();
        let texts: Vec<String> = (0..64).map(|i| format!("text number {i}")).collect();
        let batched = enc
            .encode_batch(&texts, &SpecialTokenSet::None, &SpecialTokenSet::None)
            .unwrap();
        assert_eq!(batched.len(), texts.len());
        for (text, tokens) in texts.iter().zip(&batched) {
            assert_eq!(
                tokens,
                &enc.encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None).unwrap()
            );
        }
    }

    #[test]
    fn batch_failure_propagates() {
        let enc = encoder();
        let texts = vec!["fine".to_string(), "bad <|endoftext|>".to_string()];
        let err = enc
            .encode_batch(&texts, &SpecialTokenSet::None, &SpecialTokenSet::Automatic)
            .unwrap_err();
        assert!(matches!(err, TokenizerError::DisallowedSpecial(_)));
    }

    #[test]
    fn bounded_pool_matches_unbounded() {
        let enc = encoder();
        let texts: Vec<String> = (0..16).map(|i| format!("line {i}")).collect();
        let a = enc
            .encode_batch(&texts, &SpecialTokenSet::None, &SpecialTokenSet::None)
            .unwrap();
        let b = enc
            .encode_batch_with_concurrency(&texts, &SpecialTokenSet::None, &SpecialTokenSet::None, 2)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_batch_is_ordered_and_lossy() {
        let enc = encoder();
        let lists = vec![vec![b'h' as Rank, b'i' as Rank], vec![0xFF], vec![9999]];
        let decoded = enc.decode_batch(&lists);
        assert_eq!(decoded[0], "hi");
        assert_eq!(decoded[1], "\u{FFFD}");
        assert_eq!(decoded[2], "");
    }

    #[test]
    fn worker_count_clamps() {
        assert_eq!(worker_count(8, 2), 2.min(std::thread::available_parallelism().map_or(1, usize::from)));
        assert_eq!(worker_count(0, 10), 1);
    }
}
