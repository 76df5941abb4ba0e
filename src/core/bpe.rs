//! Byte-pair merge engine.
//!
//! Works on one regex-segmented piece at a time. The algorithm keeps a flat
//! `(start, rank)` parts array and repeatedly collapses the lowest-ranked
//! adjacent pair; with `n` parts and `m` merges this is O(mn), which beats a
//! heap in practice because segmentation keeps `n` small.

use super::rank::RankTable;
use super::Rank;

/// Rank of the pair formed by `parts[i]` and the part `skip + 1` slots to its
/// right; the sentinel rank when that pair would run off the end of `piece`.
#[inline]
fn rank_at(ranks: &RankTable, piece: &[u8], parts: &[(usize, Rank)], i: usize, skip: usize) -> Rank {
    if i + skip + 2 < parts.len() {
        ranks
            .lookup(&piece[parts[i].0..parts[i + skip + 2].0])
            .unwrap_or(Rank::MAX)
    } else {
        Rank::MAX
    }
}

/// Run the merge loop and return the surviving part boundaries.
///
/// The result always has at least two entries; consecutive pairs delimit the
/// final token subslices of `piece`.
fn byte_pair_merge(ranks: &RankTable, piece: &[u8]) -> Vec<(usize, Rank)> {
    debug_assert!(piece.len() > 1);
    let mut parts: Vec<(usize, Rank)> = Vec::with_capacity(piece.len() + 1);

    let mut min_rank: (Rank, usize) = (Rank::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = ranks.lookup(&piece[i..i + 2]).unwrap_or(Rank::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    // Tail entries carry sentinel ranks; the last start index is one past the
    // end so that windows() yields the final subslice.
    parts.push((piece.len() - 1, Rank::MAX));
    parts.push((piece.len(), Rank::MAX));

    while min_rank.0 != Rank::MAX {
        let i = min_rank.1;
        // Recompute the affected pair ranks before removing parts[i + 1];
        // rank_at skips one slot to look across the not-yet-deleted entry.
        if i > 0 {
            parts[i - 1].1 = rank_at(ranks, piece, &parts, i - 1, 1);
        }
        parts[i].1 = rank_at(ranks, piece, &parts, i, 1);
        parts.remove(i + 1);

        min_rank = (Rank::MAX, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }
    parts
}

/// Encode one piece to token ranks.
///
/// Subslices that survive merging are looked up directly; a subslice absent
/// from the table decomposes into per-byte tokens, and bytes missing even a
/// single-byte entry are dropped. Vocabularies covering all 256 byte values
/// (every built-in does) never hit the drop path.
pub fn byte_pair_encode(piece: &[u8], ranks: &RankTable) -> Vec<Rank> {
    if piece.len() <= 1 {
        return ranks.lookup(piece).into_iter().collect();
    }
    let parts = byte_pair_merge(ranks, piece);
    let mut out = Vec::with_capacity(parts.len() - 1);
    for pair in parts.windows(2) {
        let sub = &piece[pair[0].0..pair[1].0];
        match ranks.lookup(sub) {
            Some(rank) => out.push(rank),
            None => out.extend(sub.iter().filter_map(|&b| ranks.lookup(&[b]))),
        }
    }
    out
}

/// Token count of one piece without materializing the token vector.
pub fn byte_pair_count(piece: &[u8], ranks: &RankTable) -> usize {
    if piece.len() <= 1 {
        return usize::from(ranks.lookup(piece).is_some());
    }
    let parts = byte_pair_merge(ranks, piece);
    parts
        .windows(2)
        .map(|pair| {
            let sub = &piece[pair[0].0..pair[1].0];
            if ranks.lookup(sub).is_some() {
                1
            } else {
                sub.iter().filter(|&&b| ranks.lookup(&[b]).is_some()).count()
            }
        })
        .sum()
}

/// Split one piece into its final token byte subslices.
///
/// The subslices concatenate back to `piece` regardless of table coverage.
pub fn byte_pair_split<'a>(piece: &'a [u8], ranks: &RankTable) -> Vec<&'a [u8]> {
    if piece.is_empty() {
        return Vec::new();
    }
    if piece.len() == 1 {
        return vec![piece];
    }
    byte_pair_merge(ranks, piece)
        .windows(2)
        .map(|pair| &piece[pair[0].0..pair[1].0])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(entries: &[(&[u8], Rank)]) -> RankTable {
        entries
            .iter()
            .map(|&(bytes, rank)| (bytes.to_vec(), rank))
            .collect()
    }

    #[test]
    fn merges_lowest_rank_first() {
        // "abcd": ab=0 merges before cd=1, then abcd is absent, so the final
        // tokens are ab and cd.
        let t = ranks(&[
            (b"a", 10),
            (b"b", 11),
            (b"c", 12),
            (b"d", 13),
            (b"ab", 0),
            (b"cd", 1),
        ]);
        assert_eq!(byte_pair_encode(b"abcd", &t), vec![0, 1]);
        assert_eq!(byte_pair_split(b"abcd", &t), vec![b"ab".as_slice(), b"cd"]);
    }

    #[test]
    fn chained_merges_reach_full_piece() {
        let t = ranks(&[
            (b"a", 10),
            (b"b", 11),
            (b"c", 12),
            (b"ab", 0),
            (b"abc", 1),
        ]);
        assert_eq!(byte_pair_encode(b"abc", &t), vec![1]);
    }

    #[test]
    fn no_merges_yields_single_bytes() {
        let t = ranks(&[(b"x", 5), (b"y", 6)]);
        assert_eq!(byte_pair_encode(b"xy", &t), vec![5, 6]);
    }

    #[test]
    fn tie_breaks_on_lowest_index() {
        // Both "aa" pairs in "aaa" share rank 0; the left pair merges first,
        // leaving "aa" + "a".
        let t = ranks(&[(b"a", 1), (b"aa", 0)]);
        assert_eq!(byte_pair_encode(b"aaa", &t), vec![0, 1]);
    }

    #[test]
    fn single_byte_fast_path() {
        let t = ranks(&[(b"q", 7)]);
        assert_eq!(byte_pair_encode(b"q", &t), vec![7]);
        assert_eq!(byte_pair_encode(b"z", &t), Vec::<Rank>::new());
    }

    #[test]
    fn missing_bytes_are_dropped() {
        // "b" has no rank at all; the unknown pair decomposes to just "a".
        let t = ranks(&[(b"a", 0)]);
        assert_eq!(byte_pair_encode(b"ab", &t), vec![0]);
        assert_eq!(byte_pair_count(b"ab", &t), 1);
    }

    #[test]
    fn count_matches_encode() {
        let t = ranks(&[
            (b"h", 0),
            (b"e", 1),
            (b"l", 2),
            (b"o", 3),
            (b"he", 4),
            (b"ll", 5),
            (b"llo", 6),
        ]);
        for piece in [&b"hello"[..], b"hhee", b"lllll", b"o"] {
            assert_eq!(
                byte_pair_count(piece, &t),
                byte_pair_encode(piece, &t).len(),
                "count disagrees for {piece:?}"
            );
        }
    }
}
