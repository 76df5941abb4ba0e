//! Stream adapter integration: chunking, provenance tags, character
//! positions, and error termination.

use ranktok::{Encoder, Rank, SpecialTokenSet, StreamTag, TokenizerError};
use rustc_hash::FxHashMap;

fn build_encoder() -> Encoder {
    let mut ranks = FxHashMap::default();
    for b in 0u8..=255 {
        ranks.insert(vec![b], b as Rank);
    }
    ranks.insert(b"hello".to_vec(), 300);
    ranks.insert(b" world".to_vec(), 301);
    let mut specials = FxHashMap::default();
    specials.insert("<|sep|>".to_string(), 900);
    Encoder::new(
        "stream-test",
        ranks,
        specials,
        r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+",
    )
    .unwrap()
}

fn collect(
    enc: &Encoder,
    text: &str,
    allowed: &SpecialTokenSet,
    chunk_size: usize,
) -> Vec<ranktok::StreamChunk> {
    enc.stream(text, allowed, &SpecialTokenSet::None, chunk_size)
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn stream_tokens_match_encode() {
    let enc = build_encoder();
    let text = "hello world and more words";
    for chunk_size in [1, 2, 3, 100] {
        let chunks = collect(&enc, text, &SpecialTokenSet::None, chunk_size);
        let streamed: Vec<Rank> = chunks.iter().flat_map(|c| c.tokens.clone()).collect();
        let direct = enc
            .encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
            .unwrap();
        assert_eq!(streamed, direct, "chunk_size {chunk_size}");
        for chunk in &chunks {
            assert!(!chunk.tokens.is_empty());
            assert!(chunk.tokens.len() <= chunk_size);
        }
    }
}

#[test]
fn text_chunks_carry_segment_char_ranges() {
    let enc = build_encoder();
    let text = "hello world";
    let chunks = collect(&enc, text, &SpecialTokenSet::None, 1);
    // One ordinary segment spans the whole text: 11 characters.
    for chunk in &chunks {
        match &chunk.tag {
            StreamTag::Text { range } => assert_eq!(*range, 0..11),
            other => panic!("unexpected tag {other:?}"),
        }
    }
}

#[test]
fn special_chunks_carry_char_positions() {
    let enc = build_encoder();
    let text = "héllo<|sep|>x";
    let chunks = collect(&enc, text, &SpecialTokenSet::All, 64);
    // "héllo" is 5 characters, so the special sits at character 5 and the
    // trailing "x" segment starts at character 12.
    let mut tags = chunks.iter().map(|c| &c.tag);
    match tags.next().unwrap() {
        StreamTag::Text { range } => assert_eq!(*range, 0..5),
        other => panic!("unexpected tag {other:?}"),
    }
    match tags.next().unwrap() {
        StreamTag::Special { literal, position } => {
            assert_eq!(literal, "<|sep|>");
            assert_eq!(*position, 5);
        }
        other => panic!("unexpected tag {other:?}"),
    }
    match tags.next().unwrap() {
        StreamTag::Text { range } => assert_eq!(*range, 12..13),
        other => panic!("unexpected tag {other:?}"),
    }
    assert!(tags.next().is_none());

    let special_chunk = &chunks[1];
    assert_eq!(special_chunk.tokens, vec![900]);
}

#[test]
fn chunk_size_zero_is_clamped() {
    let enc = build_encoder();
    let chunks = collect(&enc, "hello", &SpecialTokenSet::None, 0);
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert_eq!(chunk.tokens.len(), 1);
    }
}

#[test]
fn empty_text_streams_nothing() {
    let enc = build_encoder();
    assert!(collect(&enc, "", &SpecialTokenSet::None, 4).is_empty());
}

#[test]
fn disallowed_special_terminates_stream() {
    let enc = build_encoder();
    let mut stream = enc.stream(
        "ok<|sep|>never",
        &SpecialTokenSet::None,
        &SpecialTokenSet::Automatic,
        8,
    );
    // The leading segment arrives, then the error, then nothing.
    let first = stream.next().unwrap().unwrap();
    assert!(matches!(first.tag, StreamTag::Text { .. }));
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(err, TokenizerError::DisallowedSpecial(l) if l == "<|sep|>"));
    assert!(stream.next().is_none());
}

#[test]
fn dropping_the_stream_is_harmless() {
    let enc = build_encoder();
    let mut stream = enc.stream(
        "hello world hello world",
        &SpecialTokenSet::None,
        &SpecialTokenSet::None,
        1,
    );
    let _ = stream.next();
    drop(stream);
    // The encoder is unaffected by the abandoned scan.
    assert_eq!(
        enc.decode(&enc.encode_ordinary("hello")).unwrap(),
        "hello"
    );
}
