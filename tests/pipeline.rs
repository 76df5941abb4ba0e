//! End-to-end pipeline tests over a synthetic vocabulary.
//!
//! The vocabulary covers all 256 single bytes plus a handful of merges, so
//! every property here (round-trip, count agreement, unstable completions,
//! offsets) holds for arbitrary input text.

use ranktok::{Encoder, Rank, SpecialTokenSet, TokenizerError};
use rustc_hash::FxHashMap;

const PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

fn build_encoder() -> Encoder {
    let mut ranks = FxHashMap::default();
    for b in 0u8..=255 {
        ranks.insert(vec![b], b as Rank);
    }
    let merges: &[&[u8]] = &[
        b"he", b"llo", b"hello", b" wo", b"rld", b" world", b"in", b"ing", b" t", b"th", b"the",
        b"  ", b"    ", b"\n\n", b" f", b"fan", b"ta", b"an",
    ];
    for (i, merge) in merges.iter().enumerate() {
        ranks.insert(merge.to_vec(), 256 + i as Rank);
    }

    let mut specials = FxHashMap::default();
    specials.insert("<|endoftext|>".to_string(), 5000);
    specials.insert("<|fim_prefix|>".to_string(), 5001);
    specials.insert("<|fim_middle|>".to_string(), 5002);

    Encoder::new("synthetic", ranks, specials, PATTERN).unwrap()
}

const SAMPLES: &[&str] = &[
    "hello world",
    "the thing in the morning",
    "Mixed CASE and 1234567 numbers",
    "whitespace   runs\n\nand newlines\n",
    "unicode: こんにちは 世界 🦀",
    "這個算法真的太棒了",
    "tabs\tand\rcarriage",
    "",
    " ",
    "trailing space ",
];

#[test]
fn round_trip_all_samples() {
    let enc = build_encoder();
    for text in SAMPLES {
        let tokens = enc
            .encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
            .unwrap();
        assert_eq!(&enc.decode(&tokens).unwrap(), text, "round-trip failed");
        assert_eq!(enc.decode_bytes(&tokens), text.as_bytes());
    }
}

#[test]
fn count_matches_encode_length() {
    let enc = build_encoder();
    for text in SAMPLES {
        for (allowed, disallowed) in [
            (SpecialTokenSet::None, SpecialTokenSet::None),
            (SpecialTokenSet::All, SpecialTokenSet::None),
        ] {
            let tokens = enc.encode(text, &allowed, &disallowed).unwrap();
            assert_eq!(
                enc.token_count(text, &allowed, &disallowed).unwrap(),
                tokens.len(),
                "count disagreed for {text:?}"
            );
        }
    }
}

#[test]
fn encoding_is_deterministic() {
    let enc = build_encoder();
    for text in SAMPLES {
        let first = enc.encode(text, &SpecialTokenSet::All, &SpecialTokenSet::None).unwrap();
        for _ in 0..3 {
            let again = enc.encode(text, &SpecialTokenSet::All, &SpecialTokenSet::None).unwrap();
            assert_eq!(first, again);
        }
    }
}

#[test]
fn allowed_special_encodes_to_reserved_id() {
    let enc = build_encoder();
    let tokens = enc
        .encode(
            "<|endoftext|>",
            &SpecialTokenSet::only(["<|endoftext|>"]),
            &SpecialTokenSet::Automatic,
        )
        .unwrap();
    assert_eq!(tokens, vec![5000]);
}

#[test]
fn automatic_disallows_everything_not_allowed() {
    let enc = build_encoder();
    let err = enc
        .encode(
            "<|endoftext|>",
            &SpecialTokenSet::None,
            &SpecialTokenSet::Automatic,
        )
        .unwrap_err();
    match err {
        TokenizerError::DisallowedSpecial(literal) => assert_eq!(literal, "<|endoftext|>"),
        other => panic!("expected DisallowedSpecial, got {other}"),
    }
}

#[test]
fn disallowed_fails_even_mid_text() {
    let enc = build_encoder();
    let err = enc
        .encode(
            "prefix text <|fim_middle|> suffix",
            &SpecialTokenSet::only(["<|endoftext|>"]),
            &SpecialTokenSet::Automatic,
        )
        .unwrap_err();
    assert!(matches!(err, TokenizerError::DisallowedSpecial(l) if l == "<|fim_middle|>"));
}

#[test]
fn unlisted_specials_round_trip_as_text() {
    let enc = build_encoder();
    let text = "a<|endoftext|>b";
    let tokens = enc
        .encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    assert!(!tokens.contains(&5000));
    assert_eq!(enc.decode(&tokens).unwrap(), text);
}

#[test]
fn mixed_specials_and_text() {
    let enc = build_encoder();
    let text = "<|fim_prefix|>fn main<|fim_middle|>()<|endoftext|>";
    let tokens = enc.encode_with_special_tokens(text);
    assert!(tokens.contains(&5000));
    assert!(tokens.contains(&5001));
    assert!(tokens.contains(&5002));
    assert_eq!(enc.decode(&tokens).unwrap(), text);
}

#[test]
fn unstable_stable_prefix_property() {
    let enc = build_encoder();
    for text in ["hello fanta", "the thin", "hello wor", "ending   "] {
        let (stable, _) = enc
            .encode_with_unstable(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
            .unwrap();
        let stable_bytes = enc.decode_bytes(&stable);
        assert!(
            text.as_bytes().starts_with(&stable_bytes),
            "stable tokens for {text:?} decode past the input"
        );
    }
}

#[test]
fn unstable_completions_cover_the_input() {
    let enc = build_encoder();
    let text = "hello fanta";
    let (stable, completions) = enc
        .encode_with_unstable(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    assert!(!completions.is_empty());
    for completion in &completions {
        let mut full = stable.clone();
        full.extend(completion);
        assert!(
            enc.decode_bytes(&full).starts_with(text.as_bytes()),
            "completion {completion:?} does not extend {text:?}"
        );
    }
}

#[test]
fn unstable_whitespace_run_is_retracted() {
    let enc = build_encoder();
    // The trailing whitespace run must move into the unstable suffix, since
    // incoming text could merge with it.
    let (stable, completions) = enc
        .encode_with_unstable("word    ", &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    let stable_text = enc.decode_lossy(&stable);
    assert!(!stable_text.ends_with(' '));
    assert!(!completions.is_empty());
}

#[test]
fn unstable_ending_on_special_has_no_completions() {
    let enc = build_encoder();
    let (stable, completions) = enc
        .encode_with_unstable(
            "hello<|endoftext|>",
            &SpecialTokenSet::All,
            &SpecialTokenSet::None,
        )
        .unwrap();
    assert_eq!(stable.last(), Some(&5000));
    assert!(completions.is_empty());
}

#[test]
fn decode_with_offsets_round_trips() {
    let enc = build_encoder();
    let text = "hello 👋 world";
    let tokens = enc
        .encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    let (decoded, offsets) = enc.decode_with_offsets(&tokens).unwrap();
    assert_eq!(decoded, text);
    assert_eq!(offsets.len(), tokens.len());
    assert_eq!(offsets[0], 0);
    let nchars = text.chars().count();
    for window in offsets.windows(2) {
        assert!(window[0] <= window[1], "offsets must be non-decreasing");
    }
    assert!(offsets.iter().all(|&o| o < nchars));
}

#[test]
fn offsets_mark_token_starts() {
    let enc = build_encoder();
    let text = "the thing";
    let tokens = enc
        .encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    let (decoded, offsets) = enc.decode_with_offsets(&tokens).unwrap();
    let chars: Vec<char> = decoded.chars().collect();
    // Each token's first decoded byte lands at its reported character.
    let mut reconstructed = String::new();
    for (i, &token) in tokens.iter().enumerate() {
        let bytes = enc.decode_single_token_bytes(token).unwrap();
        let expected_start = offsets[i];
        let token_text = String::from_utf8(bytes).unwrap();
        assert!(expected_start <= chars.len());
        reconstructed.push_str(&token_text);
    }
    assert_eq!(reconstructed, decoded);
}

#[test]
fn single_token_lookups() {
    let enc = build_encoder();
    assert_eq!(enc.encode_single_token("hello").unwrap(), 258);
    assert_eq!(enc.encode_single_token("<|endoftext|>").unwrap(), 5000);
    assert!(enc.encode_single_token("not a token").is_err());

    assert_eq!(enc.decode_single_token_bytes(258).unwrap(), b"hello");
    assert_eq!(enc.decode_single_token_bytes(5001).unwrap(), b"<|fim_prefix|>");
    assert!(matches!(
        enc.decode_single_token_bytes(40000),
        Err(TokenizerError::TokenBytesNotFound(40000))
    ));
}

#[test]
fn vocab_shape() {
    let enc = build_encoder();
    assert_eq!(enc.n_vocab(), 5003);
    let values = enc.token_byte_values();
    // 256 bytes + 18 merges + 3 specials.
    assert_eq!(values.len(), 277);
    assert_eq!(values[0], vec![0u8]);
}

#[test]
fn batch_agrees_with_sequential() {
    let enc = build_encoder();
    let texts: Vec<String> = SAMPLES.iter().map(|s| s.to_string()).collect();
    let batched = enc
        .encode_batch(&texts, &SpecialTokenSet::None, &SpecialTokenSet::None)
        .unwrap();
    for (text, tokens) in texts.iter().zip(&batched) {
        assert_eq!(
            tokens,
            &enc.encode(text, &SpecialTokenSet::None, &SpecialTokenSet::None).unwrap()
        );
    }
    let decoded = enc.decode_batch(&batched);
    assert_eq!(decoded, texts);
}
