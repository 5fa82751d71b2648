//! # Word Bitmaps
//!
//! Fixed-width bit vectors over borrowed `u32` words. The free functions work
//! on plain slices so the frame allocator can carve its maps out of raw boot
//! memory; [`Bitmap`] bundles a slice with its capacity for callers that want
//! bounds-aware helpers.
//!
//! Bit `n` lives in word `n / 32` at position `n % 32` (LSB first).
//!
//! No operation checks its bit index against the slice's logical capacity;
//! callers validate indices (debug builds assert on them). Out-of-slice
//! accesses panic like any slice index.
//!
//! ```rust
//! # use kernel_bitmap::*;
//! let mut words = [0u32; 4];
//! set_range(&mut words, 3, 70);
//! assert!(all_set(&words, 3, 70));
//! assert_eq!(find_first_set(&words, 128), Some(3));
//! assert_eq!(find_first_clear(&words, 128), Some(0));
//! clear(&mut words, 3);
//! assert_eq!(find_first_set(&words, 128), Some(4));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bitmap;

pub use bitmap::{Bitmap, MapDump};

/// Storage unit of every bitmap.
pub type Word = u32;

/// Bits per [`Word`].
pub const BITS_PER_WORD: usize = Word::BITS as usize;

const ALL_ONES: Word = Word::MAX;

/// Number of words needed to hold `bits` bits.
#[inline]
#[must_use]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(BITS_PER_WORD)
}

#[inline]
const fn split(bit: usize) -> (usize, u32) {
    #[allow(clippy::cast_possible_truncation)]
    (bit / BITS_PER_WORD, (bit % BITS_PER_WORD) as u32)
}

/// Mask with bits `[from, from + len)` of a single word set.
///
/// `from + len` must not exceed [`BITS_PER_WORD`].
#[inline]
const fn span_mask(from: u32, len: u32) -> Word {
    debug_assert!(from + len <= Word::BITS);
    if len == Word::BITS {
        ALL_ONES
    } else {
        ((1 << len) - 1) << from
    }
}

/// Value of `bit`.
#[inline]
#[must_use]
pub fn get(map: &[Word], bit: usize) -> bool {
    let (w, b) = split(bit);
    map[w] & (1 << b) != 0
}

/// Sets `bit` to 1.
#[inline]
pub fn set(map: &mut [Word], bit: usize) {
    let (w, b) = split(bit);
    map[w] |= 1 << b;
}

/// Clears `bit` to 0.
#[inline]
pub fn clear(map: &mut [Word], bit: usize) {
    let (w, b) = split(bit);
    map[w] &= !(1 << b);
}

/// Calls `f(word_index, mask)` for every word touched by `[first, first + count)`.
///
/// Whole words get a full mask; the leading and trailing words get partial
/// masks. A range ending on a word boundary never visits the following word.
#[inline]
fn for_each_span(first: usize, count: usize, mut f: impl FnMut(usize, Word)) {
    if count == 0 {
        return;
    }

    let (mut w, lead) = split(first);
    let (last_w, tail) = split(first + count);

    if w == last_w {
        f(w, span_mask(lead, tail - lead));
        return;
    }

    if lead != 0 {
        f(w, span_mask(lead, Word::BITS - lead));
        w += 1;
    }
    while w < last_w {
        f(w, ALL_ONES);
        w += 1;
    }
    if tail != 0 {
        f(last_w, span_mask(0, tail));
    }
}

/// Word-aligned interior of `[first, first + count)`, if any.
#[inline]
fn whole_words(first: usize, count: usize) -> core::ops::Range<usize> {
    let start = first.div_ceil(BITS_PER_WORD);
    let end = (first + count) / BITS_PER_WORD;
    start..end.max(start)
}

/// Sets every bit in `[first, first + count)`.
pub fn set_range(map: &mut [Word], first: usize, count: usize) {
    if count == 0 {
        return;
    }
    let whole = whole_words(first, count);
    map[whole].fill(ALL_ONES);
    for_each_span(first, count, |w, mask| {
        if mask != ALL_ONES {
            map[w] |= mask;
        }
    });
}

/// Clears every bit in `[first, first + count)`.
pub fn clear_range(map: &mut [Word], first: usize, count: usize) {
    if count == 0 {
        return;
    }
    let whole = whole_words(first, count);
    map[whole].fill(0);
    for_each_span(first, count, |w, mask| {
        if mask != ALL_ONES {
            map[w] &= !mask;
        }
    });
}

/// Whether every bit in `[first, first + count)` is 1. Empty ranges are.
#[must_use]
pub fn all_set(map: &[Word], first: usize, count: usize) -> bool {
    let mut ok = true;
    for_each_span(first, count, |w, mask| ok &= map[w] & mask == mask);
    ok
}

/// Whether every bit in `[first, first + count)` is 0. Empty ranges are.
#[must_use]
pub fn all_clear(map: &[Word], first: usize, count: usize) -> bool {
    let mut ok = true;
    for_each_span(first, count, |w, mask| ok &= map[w] & mask == 0);
    ok
}

/// Lowest set bit below `capacity`.
#[must_use]
pub fn find_first_set(map: &[Word], capacity: usize) -> Option<usize> {
    find_first(map, capacity, |w| w)
}

/// Lowest clear bit below `capacity`.
#[must_use]
pub fn find_first_clear(map: &[Word], capacity: usize) -> Option<usize> {
    find_first(map, capacity, |w| !w)
}

/// Scans whole words, skipping those that `view` maps to zero.
#[inline]
fn find_first(map: &[Word], capacity: usize, view: impl Fn(Word) -> Word) -> Option<usize> {
    map.iter()
        .take(words_for(capacity))
        .enumerate()
        .find_map(|(i, &w)| {
            let hits = view(w);
            (hits != 0).then(|| i * BITS_PER_WORD + hits.trailing_zeros() as usize)
        })
        .filter(|&bit| bit < capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_span() {
        let mut m = [0u32; 2];
        set_range(&mut m, 4, 8);
        assert_eq!(m, [0x0000_0FF0, 0]);
        clear_range(&mut m, 6, 2);
        assert_eq!(m, [0x0000_0F30, 0]);
    }

    #[test]
    fn range_ending_on_word_boundary_leaves_next_word_alone() {
        let mut m = [0u32, 0, 0xDEAD_BEEF];
        set_range(&mut m, 16, 48);
        assert_eq!(m, [0xFFFF_0000, 0xFFFF_FFFF, 0xDEAD_BEEF]);

        let mut m = [u32::MAX; 3];
        clear_range(&mut m, 0, 64);
        assert_eq!(m, [0, 0, u32::MAX]);
    }

    #[test]
    fn multi_word_span_with_partial_edges() {
        let mut m = [0u32; 4];
        set_range(&mut m, 30, 70);
        assert_eq!(m, [0xC000_0000, 0xFFFF_FFFF, 0xFFFF_FFFF, 0x0000_000F]);

        set_range(&mut m, 96, 5);
        assert_eq!(m[3], 0x1F);

        clear_range(&mut m, 31, 66);
        assert_eq!(m, [0x4000_0000, 0, 0, 0x1E]);
    }

    #[test]
    fn zero_count_is_a_no_op() {
        let mut m = [0x1234_5678u32];
        set_range(&mut m, 5, 0);
        clear_range(&mut m, 5, 0);
        assert_eq!(m, [0x1234_5678]);
        assert!(all_set(&m, 0, 0));
        assert!(all_clear(&m, 3, 0));
    }

    #[test]
    fn predicates_see_partial_words() {
        let mut m = [0u32; 3];
        set_range(&mut m, 10, 60);
        assert!(all_set(&m, 10, 60));
        assert!(!all_set(&m, 9, 60));
        assert!(!all_set(&m, 10, 61));
        assert!(all_clear(&m, 0, 10));
        assert!(all_clear(&m, 70, 26));
        assert!(!all_clear(&m, 0, 11));

        clear(&mut m, 40);
        assert!(!all_set(&m, 10, 60));
        assert!(!all_clear(&m, 35, 10));
    }

    #[test]
    fn find_respects_capacity() {
        let mut m = [0u32; 2];
        set(&mut m, 40);
        assert_eq!(find_first_set(&m, 64), Some(40));
        assert_eq!(find_first_set(&m, 41), Some(40));
        assert_eq!(find_first_set(&m, 40), None);
        assert_eq!(find_first_set(&m, 0), None);

        let mut full = [u32::MAX; 2];
        assert_eq!(find_first_clear(&full, 64), None);
        clear(&mut full, 63);
        assert_eq!(find_first_clear(&full, 63), None);
        assert_eq!(find_first_clear(&full, 64), Some(63));
    }

    #[test]
    fn find_skips_whole_words() {
        let mut m = [0u32; 4];
        set(&mut m, 97);
        set(&mut m, 127);
        assert_eq!(find_first_set(&m, 128), Some(97));

        let mut m = [u32::MAX; 4];
        clear(&mut m, 65);
        assert_eq!(find_first_clear(&m, 128), Some(65));
    }

    #[test]
    fn point_operations() {
        let mut m = [0u32; 2];
        set(&mut m, 33);
        assert!(get(&m, 33));
        assert!(!get(&m, 32));
        assert_eq!(m, [0, 2]);
        clear(&mut m, 33);
        assert_eq!(m, [0, 0]);
    }

    #[test]
    fn word_counts() {
        assert_eq!(words_for(0), 0);
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(32), 1);
        assert_eq!(words_for(33), 2);
        assert_eq!(words_for(16288), 509);
    }
}
