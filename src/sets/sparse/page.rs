use std::{
    fmt::{self, Write},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

pub const BITS_PER_PAGE: usize = 4096;
pub const WORDS_PER_PAGE: usize = BITS_PER_PAGE / 64;
pub const BYTES_PER_PAGE: usize = BITS_PER_PAGE / 8;

/// Mask covering bits `lo..=hi` of a word.
#[inline]
fn span_mask(lo: usize, hi: usize) -> u64 {
    debug_assert!(lo <= hi && hi < 64);
    (u64::MAX << lo) & (u64::MAX >> (63 - hi))
}

/// Fixed block of [`BITS_PER_PAGE`] bits, the unit of physical storage.
///
/// Every mutation is a compare-and-swap loop on the containing word, so
/// concurrent writers touching different bits of the same word never lose an
/// update and no lock is ever held.
pub struct Page {
    words: [AtomicU64; WORDS_PER_PAGE],
    /// One past the highest byte ever written, for rendering only.
    touched: AtomicUsize,
}

impl Page {
    pub fn new() -> Self {
        Self {
            words: [const { AtomicU64::new(0) }; WORDS_PER_PAGE],
            touched: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn load(&self, word_index: usize) -> u64 {
        self.words[word_index].load(Ordering::Acquire)
    }

    /// Applies `f` to a word until the compare-and-swap succeeds.
    #[inline]
    fn update(&self, word_index: usize, f: impl Fn(u64) -> u64) {
        let word = &self.words[word_index];
        let mut current = word.load(Ordering::Acquire);
        loop {
            let next = f(current);
            if next == current {
                return;
            }
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn touch(&self, last_bit: usize) {
        self.touched.fetch_max(last_bit / 8 + 1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, offset: usize) -> bool {
        (self.load(offset / 64) & (1 << (offset % 64))) != 0
    }

    #[inline]
    pub fn set(&self, offset: usize, value: bool) {
        let mask = 1u64 << (offset % 64);
        if value {
            self.update(offset / 64, |w| w | mask);
        } else {
            self.update(offset / 64, |w| w & !mask);
        }
        self.touch(offset);
    }

    /// Sets every bit in `start..=end`.
    pub fn set_range(&self, start: usize, end: usize) {
        self.apply_range(start, end, true);
    }

    /// Clears every bit in `start..=end`.
    pub fn clear_range(&self, start: usize, end: usize) {
        self.apply_range(start, end, false);
    }

    fn apply_range(&self, start: usize, end: usize, value: bool) {
        assert!(
            start <= end && end < BITS_PER_PAGE,
            "page range {start}..={end} out of bounds"
        );
        let first_word = start / 64;
        let last_word = end / 64;

        for word_index in first_word..=last_word {
            let lo = if word_index == first_word { start % 64 } else { 0 };
            let hi = if word_index == last_word { end % 64 } else { 63 };
            let mask = span_mask(lo, hi);
            if value {
                self.update(word_index, |w| w | mask);
            } else {
                self.update(word_index, |w| w & !mask);
            }
        }
        self.touch(end);
    }

    /// Sets the whole page.
    pub fn fill(&self) {
        for word in &self.words {
            word.store(u64::MAX, Ordering::Release);
        }
        self.touch(BITS_PER_PAGE - 1);
    }

    /// Clears the whole page.
    pub fn clear_all(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
        self.touch(BITS_PER_PAGE - 1);
    }

    /// First set bit at or after `from`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        self.scan(from, |w| w)
    }

    /// First clear bit at or after `from`.
    pub fn next_clear_bit(&self, from: usize) -> Option<usize> {
        self.scan(from, |w| !w)
    }

    /// Word-at-a-time forward scan for the first `1` in the words as seen
    /// through `view`.
    fn scan(&self, from: usize, view: impl Fn(u64) -> u64) -> Option<usize> {
        if from >= BITS_PER_PAGE {
            return None;
        }
        let mut word_index = from / 64;
        let mut word = view(self.load(word_index)) & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                return Some(word_index * 64 + word.trailing_zeros() as usize);
            }
            word_index += 1;
            if word_index == WORDS_PER_PAGE {
                return None;
            }
            word = view(self.load(word_index));
        }
    }

    pub fn count_ones(&self) -> usize {
        (0..WORDS_PER_PAGE)
            .map(|i| self.load(i).count_ones() as usize)
            .sum()
    }

    /// Number of leading bytes that have ever been written to.
    pub fn touched_bytes(&self) -> usize {
        self.touched.load(Ordering::Relaxed)
    }

    fn byte(&self, byte_index: usize) -> u8 {
        (self.load(byte_index / 8) >> ((byte_index % 8) * 8)) as u8
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the touched bytes, bit 0 of each byte leftmost: `[01000000.00010000]`.
impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('[')?;
        for byte_index in 0..self.touched_bytes() {
            if byte_index > 0 {
                f.write_char('.')?;
            }
            let byte = self.byte(byte_index);
            for bit in 0..8 {
                f.write_char(if (byte >> bit) & 1 == 1 { '1' } else { '0' })?;
            }
        }
        f.write_char(']')
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("ones", &self.count_ones())
            .field("touched_bytes", &self.touched_bytes())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn new_page_all_bits_cleared() {
        let page = Page::new();
        for i in 0..BITS_PER_PAGE {
            assert!(!page.get(i), "bit {i} should be cleared on new page");
        }
        assert_eq!(page.count_ones(), 0);
        assert_eq!(page.to_string(), "[]");
    }

    #[test]
    fn set_and_get_single_bit() {
        let page = Page::new();
        page.set(42, true);
        assert!(page.get(42));
        assert!(!page.get(41));
        assert!(!page.get(43));

        page.set(42, false);
        assert!(!page.get(42));
    }

    #[test]
    fn set_bits_across_u64_boundaries() {
        let page = Page::new();
        let boundary_positions = [0, 63, 64, 127, 128, 191, 192, BITS_PER_PAGE - 1];

        for &pos in &boundary_positions {
            page.set(pos, true);
        }

        for i in 0..BITS_PER_PAGE {
            let expected = boundary_positions.contains(&i);
            assert_eq!(page.get(i), expected, "bit {i} mismatch");
        }
    }

    #[test]
    fn idempotent_set_operations() {
        let page = Page::new();
        page.set(100, true);
        page.set(100, true);
        assert!(page.get(100));
        assert_eq!(page.count_ones(), 1);

        page.set(100, false);
        page.set(100, false);
        assert!(!page.get(100));
        assert_eq!(page.count_ones(), 0);
    }

    #[test]
    fn renders_bytes_with_bit_zero_leftmost() {
        let page = Page::new();
        for bit in [1, 11, 21, 31] {
            page.set(bit, true);
        }
        assert_eq!(page.to_string(), "[01000000.00010000.00000100.00000001]");
    }

    #[test]
    fn rendering_stops_at_the_high_water_mark() {
        let page = Page::new();
        page.set(17, false);
        assert_eq!(page.to_string(), "[00000000.00000000.00000000]");
    }

    #[test]
    fn set_range_within_one_word() {
        let page = Page::new();
        page.set_range(3, 9);
        for i in 0..64 {
            assert_eq!(page.get(i), (3..=9).contains(&i), "bit {i} mismatch");
        }
    }

    #[test]
    fn set_range_spanning_many_words() {
        let page = Page::new();
        page.set_range(60, 200);
        assert!(!page.get(59));
        assert!(!page.get(201));
        assert_eq!(page.count_ones(), 141);
        assert_eq!(page.next_set_bit(0), Some(60));
        assert_eq!(page.next_clear_bit(60), Some(201));
    }

    #[test]
    fn clear_range_leaves_neighbours() {
        let page = Page::new();
        page.set_range(0, 63);
        page.clear_range(3, 43);
        assert_eq!(
            page.to_string(),
            "[11100000.00000000.00000000.00000000.00000000.00001111.11111111.11111111]"
        );
    }

    #[test]
    fn full_width_range_covers_the_page() {
        let page = Page::new();
        page.set_range(0, BITS_PER_PAGE - 1);
        assert_eq!(page.count_ones(), BITS_PER_PAGE);
        page.clear_range(0, BITS_PER_PAGE - 1);
        assert_eq!(page.count_ones(), 0);
    }

    #[test]
    fn fill_and_clear_all() {
        let page = Page::new();
        page.fill();
        assert_eq!(page.count_ones(), BITS_PER_PAGE);
        assert_eq!(page.next_clear_bit(0), None);
        assert_eq!(page.touched_bytes(), BYTES_PER_PAGE);

        page.clear_all();
        assert_eq!(page.count_ones(), 0);
        assert_eq!(page.next_set_bit(0), None);
    }

    #[test]
    fn next_set_bit_walks_in_order() {
        let page = Page::new();
        let bits = [0, 5, 64, 65, 1000, BITS_PER_PAGE - 1];
        for &b in &bits {
            page.set(b, true);
        }

        let mut found = Vec::new();
        let mut from = 0;
        while let Some(bit) = page.next_set_bit(from) {
            found.push(bit);
            from = bit + 1;
        }
        assert_eq!(found, bits);
        assert_eq!(page.next_set_bit(BITS_PER_PAGE), None);
    }

    #[test]
    fn next_clear_bit_skips_full_words() {
        let page = Page::new();
        page.set_range(0, 130);
        assert_eq!(page.next_clear_bit(0), Some(131));
        assert_eq!(page.next_clear_bit(140), Some(140));
        assert_eq!(page.next_clear_bit(BITS_PER_PAGE), None);
    }

    #[test]
    fn first_and_last_bit_in_each_u64_chunk() {
        let page = Page::new();
        for chunk_idx in 0..WORDS_PER_PAGE {
            page.set(chunk_idx * 64, true);
            page.set(chunk_idx * 64 + 63, true);
        }

        for chunk_idx in 0..WORDS_PER_PAGE {
            let first = chunk_idx * 64;
            assert!(page.get(first));
            assert!(!page.get(first + 1));
            assert!(page.get(first + 63));
            assert!(!page.get(first + 62));
        }
        assert_eq!(page.count_ones(), 2 * WORDS_PER_PAGE);
    }

    #[test]
    fn concurrent_writers_on_one_word_lose_nothing() {
        let page = Page::new();
        std::thread::scope(|s| {
            for bit in 0..64 {
                let page = &page;
                s.spawn(move || {
                    for _ in 0..100 {
                        page.set(bit, true);
                    }
                });
            }
        });
        assert_eq!(page.count_ones(), 64);
    }

    #[test]
    #[should_panic]
    fn range_past_the_page_panics() {
        Page::new().set_range(10, BITS_PER_PAGE);
    }
}
