use crate::{BITS_PER_WORD, Word, words_for};
use core::fmt;

/// A bitmap over borrowed words with a fixed logical capacity.
///
/// Bits at or beyond `capacity` in the last word are never set by the
/// allocator-facing helpers; scans ignore them.
pub struct Bitmap<'a> {
    words: &'a mut [Word],
    capacity: usize,
}

impl<'a> Bitmap<'a> {
    /// Wraps `words`, which must hold at least `capacity` bits.
    #[must_use]
    pub fn new(words: &'a mut [Word], capacity: usize) -> Self {
        debug_assert!(
            words.len() >= words_for(capacity),
            "bitmap storage too small: {} words for {capacity} bits",
            words.len()
        );
        Self { words, capacity }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn words(&self) -> &[Word] {
        self.words
    }

    #[inline]
    #[must_use]
    pub fn get(&self, bit: usize) -> bool {
        debug_assert!(bit < self.capacity, "bit {bit} out of range");
        crate::get(self.words, bit)
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.capacity, "bit {bit} out of range");
        crate::set(self.words, bit);
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.capacity, "bit {bit} out of range");
        crate::clear(self.words, bit);
    }

    pub fn set_range(&mut self, first: usize, count: usize) {
        debug_assert!(first + count <= self.capacity, "range out of bounds");
        crate::set_range(self.words, first, count);
    }

    pub fn clear_range(&mut self, first: usize, count: usize) {
        debug_assert!(first + count <= self.capacity, "range out of bounds");
        crate::clear_range(self.words, first, count);
    }

    #[must_use]
    pub fn all_set(&self, first: usize, count: usize) -> bool {
        crate::all_set(self.words, first, count)
    }

    #[must_use]
    pub fn all_clear(&self, first: usize, count: usize) -> bool {
        crate::all_clear(self.words, first, count)
    }

    #[must_use]
    pub fn find_first_set(&self) -> Option<usize> {
        crate::find_first_set(self.words, self.capacity)
    }

    #[must_use]
    pub fn find_first_clear(&self) -> Option<usize> {
        crate::find_first_clear(self.words, self.capacity)
    }

    /// Lowest set bit in `[start, min(start + len, capacity))`.
    ///
    /// `start` must be word aligned.
    #[must_use]
    pub fn find_first_set_in(&self, start: usize, len: usize) -> Option<usize> {
        debug_assert_eq!(start % BITS_PER_WORD, 0, "window start must be word aligned");
        let len = len.min(self.capacity.saturating_sub(start));
        let words = self.words.get(start / BITS_PER_WORD..)?;
        crate::find_first_set(words, len).map(|bit| start + bit)
    }

    /// Number of set bits below `capacity`.
    #[must_use]
    pub fn count_set(&self) -> usize {
        (0..self.capacity).filter(|&bit| crate::get(self.words, bit)).count()
    }

    /// Renders the map one character per bit: `-` for set, `U` for clear.
    #[must_use]
    pub fn dump(&self) -> MapDump<'_> {
        MapDump {
            words: self.words,
            capacity: self.capacity,
        }
    }
}

impl fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("capacity", &self.capacity)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Textual bitmap dump, 65 bits per line.
pub struct MapDump<'a> {
    words: &'a [Word],
    capacity: usize,
}

impl MapDump<'_> {
    pub const BITS_PER_LINE: usize = 65;
}

impl fmt::Display for MapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in 0..self.capacity {
            let c = if crate::get(self.words, bit) { '-' } else { 'U' };
            fmt::Write::write_char(f, c)?;
            if bit % Self::BITS_PER_LINE == Self::BITS_PER_LINE - 1 {
                f.write_str("\n")?;
            }
        }
        Ok(())
    }
}
