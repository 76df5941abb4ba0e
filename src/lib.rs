//! ranktok: a BPE tokenizer compatible with the OpenAI tiktoken encodings.
//!
//! Supports the gpt2, r50k_base, p50k_base, p50k_edit, cl100k_base,
//! o200k_base, and o200k_harmony encodings, plus custom registrations:
//!
//! - byte-pair encoding over a rank map, with an LRU chunk cache
//! - special-token handling under caller policies (none / all / only /
//!   automatic), failing fast on disallowed literals
//! - token counting without materializing token vectors
//! - unstable-suffix completion enumeration for prompt-completion seams
//! - decoding with per-token character offsets
//! - a process-wide registry resolving encoding names, model aliases, and
//!   model-name prefixes, with plugin load/unload
//! - rayon-parallel batch encode/decode and a provenance-tagged token stream
//!
//! ```no_run
//! use ranktok::{get_encoding, SpecialTokenSet};
//!
//! let enc = get_encoding("cl100k_base")?;
//! let tokens = enc.encode("hello world", &SpecialTokenSet::None, &SpecialTokenSet::Automatic)?;
//! assert_eq!(enc.decode(&tokens)?, "hello world");
//! # Ok::<(), ranktok::TokenizerError>(())
//! ```

pub mod core;

pub use crate::core::{
    encoding_for_model, get_encoding, get_encoding_with, load_plugin, register, register_alias,
    register_prefix, reset, resolve, unload_plugin, unregister, Encoder, EncodingPlugin, Rank,
    RankSource, RankTable, SourceFetcher, SpecialTokenSet, StreamChunk, StreamTag,
    StreamingDecoder, TokenStream, TokenizerError, VocabError, VocabLoader, VocabSpec,
};
