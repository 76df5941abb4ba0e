//! Vocabulary loaders: producing a finalized `bytes → rank` map from a
//! tiktoken rank file, a GPT-2 merges file, or a caller-supplied map.
//!
//! Transport is a collaborator concern: the core resolves local paths and
//! in-memory bytes itself, and delegates URL sources to a [`SourceFetcher`]
//! the caller provides (which is also where checksum verification and disk
//! caching live).

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use rustc_hash::FxHashMap;

use super::error::VocabError;
use super::Rank;

/// Where a loader's raw bytes come from.
#[derive(Debug, Clone)]
pub enum RankSource {
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

/// Collaborator hook for fetching remote sources.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, VocabError>;
}

impl RankSource {
    fn resolve(&self, fetcher: Option<&dyn SourceFetcher>) -> Result<Vec<u8>, VocabError> {
        match self {
            RankSource::Path(path) => std::fs::read(path).map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    VocabError::FileNotFound(path.display().to_string())
                } else {
                    VocabError::Io(err)
                }
            }),
            RankSource::Bytes(bytes) => Ok(bytes.clone()),
            RankSource::Url(url) => match fetcher {
                Some(fetcher) => fetcher.fetch(url),
                None => Err(VocabError::InvalidSource(format!(
                    "{url}: remote sources need a fetcher; use load_with"
                ))),
            },
        }
    }
}

/// How to produce the rank map for an encoding.
#[derive(Debug, Clone)]
pub enum VocabLoader {
    /// Line-oriented `base64(token) rank` file.
    TiktokenFile(RankSource),
    /// GPT-2 merges text; single-byte ranks are synthesized from the
    /// printable-byte permutation and each merge takes the next rank.
    DataGym { merges: RankSource },
    /// A finished rank map, used as-is.
    MergeableRanks(FxHashMap<Vec<u8>, Rank>),
}

impl VocabLoader {
    /// Load using only local sources (paths and in-memory bytes).
    pub fn load(&self) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
        self.load_with(None)
    }

    /// Load, delegating URL sources to `fetcher`.
    pub fn load_with(
        &self,
        fetcher: Option<&dyn SourceFetcher>,
    ) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
        match self {
            VocabLoader::TiktokenFile(source) => {
                let data = source.resolve(fetcher)?;
                let ranks = parse_tiktoken_ranks(&data);
                debug!("loaded {} ranks from tiktoken source", ranks.len());
                Ok(ranks)
            }
            VocabLoader::DataGym { merges } => {
                let data = merges.resolve(fetcher)?;
                let ranks = parse_data_gym_ranks(&String::from_utf8_lossy(&data));
                debug!("synthesized {} ranks from merges source", ranks.len());
                Ok(ranks)
            }
            VocabLoader::MergeableRanks(ranks) => Ok(ranks.clone()),
        }
    }
}

/// Parse the tiktoken rank file format: one `base64(token) rank` pair per
/// line. Blank and malformed lines are skipped; a duplicated token keeps the
/// last rank seen.
pub fn parse_tiktoken_ranks(data: &[u8]) -> FxHashMap<Vec<u8>, Rank> {
    let mut ranks = FxHashMap::default();
    for line in data.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(split) = line.iter().position(|&b| b == b' ') else {
            continue;
        };
        let Ok(token) = BASE64.decode(&line[..split]) else {
            continue;
        };
        let Some(rank) = std::str::from_utf8(&line[split + 1..])
            .ok()
            .and_then(|s| s.trim().parse::<Rank>().ok())
        else {
            continue;
        };
        ranks.insert(token, rank);
    }
    ranks
}

/// The GPT-2 byte remapping: rank order over single bytes, and the reverse
/// map from remapped scalars back to bytes.
///
/// Printable non-whitespace bytes come first in ascending order and map to
/// themselves; the remaining bytes follow in ascending order, shifted to
/// scalars from U+0100 up.
fn data_gym_byte_maps() -> (Vec<u8>, FxHashMap<char, u8>) {
    let mut rank_to_byte: Vec<u8> = (0x21..=0x7E).chain(0xA1..=0xAC).chain(0xAE..=0xFF).collect();
    let mut char_to_byte: FxHashMap<char, u8> =
        rank_to_byte.iter().map(|&b| (char::from(b), b)).collect();

    let printable = |b: u8| matches!(b, 0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF);
    let mut shifted = 0u32;
    for b in 0u8..=255 {
        if !printable(b) {
            rank_to_byte.push(b);
            char_to_byte.insert(char::from_u32(0x100 + shifted).unwrap(), b);
            shifted += 1;
        }
    }
    debug_assert_eq!(rank_to_byte.len(), 256);
    debug_assert_eq!(char_to_byte.len(), 256);
    (rank_to_byte, char_to_byte)
}

/// Synthesize a rank map from GPT-2 merges text.
///
/// Ranks 0..=255 cover the single bytes in remap order; each merge line
/// (`first second` in the remapped alphabet) appends the concatenated byte
/// key at the next rank. A `#version` header and unparseable lines are
/// skipped.
pub fn parse_data_gym_ranks(merges: &str) -> FxHashMap<Vec<u8>, Rank> {
    let (rank_to_byte, char_to_byte) = data_gym_byte_maps();
    let mut ranks: FxHashMap<Vec<u8>, Rank> = rank_to_byte
        .into_iter()
        .enumerate()
        .map(|(rank, byte)| (vec![byte], rank as Rank))
        .collect();

    let decode = |part: &str| -> Option<Vec<u8>> {
        part.chars().map(|c| char_to_byte.get(&c).copied()).collect()
    };

    let mut next_rank = 256 as Rank;
    for line in merges.lines() {
        if line.is_empty() || line.starts_with("#version") {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(first), Some(second)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (Some(mut key), Some(tail)) = (decode(first), decode(second)) else {
            continue;
        };
        key.extend(tail);
        ranks.insert(key, next_rank);
        next_rank += 1;
    }
    ranks
}
