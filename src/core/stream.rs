//! Chunked token streaming with provenance tags, and the UTF-8 safe
//! streaming token decoder.

use std::collections::VecDeque;
use std::ops::Range;

use super::encoder::{Encoder, Scanner, Step};
use super::error::TokenizerError;
use super::Rank;

/// Where a stream chunk's tokens came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTag {
    /// Ordinary text; `range` is the half-open character interval of the
    /// source segment (Unicode scalars, not bytes).
    Text { range: Range<usize> },
    /// An accepted special token and its character position.
    Special { literal: String, position: usize },
}

/// A non-empty run of tokens emitted by [`Encoder::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub tokens: Vec<Rank>,
    pub tag: StreamTag,
}

/// Lazy iterator over [`StreamChunk`]s.
///
/// Each ordinary segment's tokens are sliced into runs of at most
/// `chunk_size`, all tagged with the segment's character range; each accepted
/// special yields a one-token chunk. The first policy error ends the stream.
pub struct TokenStream<'a> {
    encoder: &'a Encoder,
    text: &'a str,
    scanner: Scanner<'a>,
    chunk_size: usize,
    chars_seen: usize,
    pending: VecDeque<StreamChunk>,
    done: bool,
}

impl<'a> TokenStream<'a> {
    pub(crate) fn new(
        encoder: &'a Encoder,
        text: &'a str,
        scanner: Scanner<'a>,
        chunk_size: usize,
    ) -> Self {
        Self {
            encoder,
            text,
            scanner,
            chunk_size: chunk_size.max(1),
            chars_seen: 0,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn push_text_chunks(&mut self, range: Range<usize>) {
        let segment = &self.text[range];
        let nchars = segment.chars().count();
        let char_range = self.chars_seen..self.chars_seen + nchars;
        self.chars_seen = char_range.end;

        let tokens = self.encoder.encode_ordinary(segment);
        for slice in tokens.chunks(self.chunk_size) {
            self.pending.push_back(StreamChunk {
                tokens: slice.to_vec(),
                tag: StreamTag::Text {
                    range: char_range.clone(),
                },
            });
        }
    }

    fn push_fragment(&mut self, range: Range<usize>) {
        let segment = &self.text[range];
        let char_range = self.chars_seen..self.chars_seen + segment.chars().count();
        self.chars_seen = char_range.end;

        let tokens = self.encoder.encode_piece(segment.as_bytes());
        if !tokens.is_empty() {
            self.pending.push_back(StreamChunk {
                tokens,
                tag: StreamTag::Text { range: char_range },
            });
        }
    }

    fn push_special(&mut self, literal: &str, id: Rank) {
        let position = self.chars_seen;
        self.chars_seen += literal.chars().count();
        self.pending.push_back(StreamChunk {
            tokens: vec![id],
            tag: StreamTag::Special {
                literal: literal.to_string(),
                position,
            },
        });
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Result<StreamChunk, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }
            match self.scanner.next_step() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Some(Ok(Step::Ordinary(range))) => self.push_text_chunks(range),
                Some(Ok(Step::Fragment(range))) => self.push_fragment(range),
                Some(Ok(Step::Special { literal, id })) => self.push_special(literal, id),
            }
        }
    }
}

/// Stateful decoder for token-at-a-time output.
///
/// Token boundaries rarely align with character boundaries, so the decoder
/// buffers bytes and only emits complete UTF-8. Invalid sequences surface as
/// U+FFFD; an incomplete trailing sequence stays buffered until [`flush`]
/// (which also replaces it) or more tokens arrive.
///
/// [`flush`]: StreamingDecoder::flush
pub struct StreamingDecoder<'a> {
    encoder: &'a Encoder,
    buffer: Vec<u8>,
}

impl<'a> StreamingDecoder<'a> {
    pub fn new(encoder: &'a Encoder) -> Self {
        Self {
            encoder,
            buffer: Vec::with_capacity(16),
        }
    }

    /// Feed one token; returns any newly completed text.
    pub fn add_token(&mut self, token: Rank) -> Option<String> {
        self.buffer
            .extend_from_slice(&self.encoder.decode_bytes(&[token]));
        self.drain_ready()
    }

    /// Feed several tokens at once; returns any newly completed text.
    pub fn add_tokens(&mut self, tokens: &[Rank]) -> Option<String> {
        self.buffer.extend_from_slice(&self.encoder.decode_bytes(tokens));
        self.drain_ready()
    }

    /// Emit whatever is buffered, replacing an incomplete tail with U+FFFD.
    pub fn flush(&mut self) -> String {
        if self.buffer.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        out
    }

    /// Discard buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Move every decodable prefix out of the buffer, keeping only a
    /// possibly-incomplete trailing sequence.
    fn drain_ready(&mut self) -> Option<String> {
        let mut out = String::new();
        let mut consumed = 0;
        loop {
            let tail = &self.buffer[consumed..];
            if tail.is_empty() {
                break;
            }
            match std::str::from_utf8(tail) {
                Ok(text) => {
                    out.push_str(text);
                    consumed += tail.len();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // SAFETY: from_utf8 just validated this prefix.
                    out.push_str(unsafe { std::str::from_utf8_unchecked(&tail[..valid]) });
                    match err.error_len() {
                        // Incomplete sequence: leave it buffered.
                        None => {
                            consumed += valid;
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                    }
                }
            }
        }
        self.buffer.drain(..consumed);
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
