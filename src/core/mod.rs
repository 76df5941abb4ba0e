//! Core tokenization engine.
//!
//! A BPE tokenizer compatible with the OpenAI tiktoken encodings, organized
//! as:
//!
//! - [`Encoder`]: the per-encoding instance with segmentation, special-token
//!   policies, counting, unstable completions, decoding, and an LRU chunk cache
//! - [`bpe`]: the low-level byte-pair merge engine
//! - [`RankTable`]: the rank map with its reverse map and sorted prefix index
//! - [`loader`]: rank-map production from tiktoken files, GPT-2 merges, or
//!   caller-supplied maps
//! - [`registry`]: the process-wide encoding registry with model aliases,
//!   prefixes, and plugins
//! - [`TokenStream`] / [`StreamingDecoder`]: chunked encoding output and
//!   UTF-8 safe token-at-a-time decoding
//! - batch encode/decode over rayon
//!
//! Encoding runs single-pass over the input: special-token literals are
//! matched at the cursor under the caller's allowed/disallowed policies, and
//! the ordinary text between them is split by the encoding's regex and merged
//! piece by piece.

mod batch;
pub mod bpe;
mod encoder;
mod error;
pub mod loader;
mod rank;
pub mod registry;
mod segment;
mod special;
mod stream;

/// Token identifier. Ranks double as token IDs for non-special tokens.
pub type Rank = u32;

pub use encoder::Encoder;
pub use error::{TokenizerError, VocabError};
pub use loader::{RankSource, SourceFetcher, VocabLoader};
pub use rank::RankTable;
pub use registry::{
    encoding_for_model, get_encoding, get_encoding_with, load_plugin, register, register_alias,
    register_prefix, reset, resolve, unload_plugin, unregister, EncodingPlugin, VocabSpec,
};
pub use special::SpecialTokenSet;
pub use stream::{StreamChunk, StreamTag, StreamingDecoder, TokenStream};
