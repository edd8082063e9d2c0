use std::{
    fmt::{self, Write},
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::trace;

use crate::{
    sets::sparse::page::{BITS_PER_PAGE, Page},
    statistics::{Counter, Metrics},
};

/// A fixed-size slice of the logical bit space, backed by lazily created pages.
///
/// Page slots are filled at most once, under the segment's own creation lock,
/// and never emptied again. Reads and clears of a page that was never written
/// behave as if the page were all zeros and allocate nothing.
pub struct Segment {
    capacity: usize,
    pages: Box<[OnceLock<Box<Page>>]>,
    page_count: AtomicUsize,
    creation_lock: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl Segment {
    /// Creates an empty segment of `2^log2_size` bits reporting page creation to `metrics`.
    pub fn new(log2_size: u32, metrics: Arc<Metrics>) -> Self {
        let capacity = 1usize << log2_size;
        let slots = capacity.div_ceil(BITS_PER_PAGE);
        Segment {
            capacity,
            pages: (0..slots).map(|_| OnceLock::new()).collect(),
            page_count: AtomicUsize::new(0),
            creation_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages materialized so far.
    pub fn page_count(&self) -> usize {
        self.page_count.load(Ordering::Relaxed)
    }

    /// The page holding `offset`, creating it when absent and `create_if_absent` is set.
    ///
    /// Panics when `offset` is not below [`capacity`](Self::capacity), even if
    /// it would fall inside the segment's last page.
    pub fn page_containing(&self, offset: usize, create_if_absent: bool) -> Option<&Page> {
        self.check_offset(offset);
        let page_index = offset / BITS_PER_PAGE;
        match self.pages[page_index].get() {
            Some(page) => Some(page.as_ref()),
            None if create_if_absent => Some(self.create_page(page_index)),
            None => None,
        }
    }

    fn create_page(&self, page_index: usize) -> &Page {
        let slot = &self.pages[page_index];
        let _guard = self
            .creation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // another writer may have won the race while we waited on the lock
        if let Some(page) = slot.get() {
            return page;
        }

        let page = slot.get_or_init(|| Box::new(Page::new()));
        self.page_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.bump(Counter::PagesCreated);
        trace!(page = page_index, "materialized page");
        page
    }

    fn check_offset(&self, offset: usize) {
        assert!(
            offset < self.capacity,
            "segment offset {offset} out of bounds (capacity {})",
            self.capacity
        );
    }

    pub fn get(&self, offset: usize) -> bool {
        match self.page_containing(offset, false) {
            Some(page) => page.get(offset % BITS_PER_PAGE),
            None => false,
        }
    }

    pub fn set(&self, offset: usize, value: bool) {
        if let Some(page) = self.page_containing(offset, value) {
            page.set(offset % BITS_PER_PAGE, value);
        }
    }

    /// Sets every bit in `start..=end`.
    pub fn set_range(&self, start: usize, end: usize) {
        self.apply_range(start, end, true);
    }

    /// Clears every bit in `start..=end`. Absent pages are left absent.
    pub fn clear_range(&self, start: usize, end: usize) {
        self.apply_range(start, end, false);
    }

    /// Splits `start..=end` into page-aligned runs. Pages covered end to end
    /// get a bulk fill or clear; the boundary pages get a masked update.
    fn apply_range(&self, start: usize, end: usize, value: bool) {
        assert!(
            start <= end && end < self.capacity,
            "segment range {start}..={end} out of bounds (capacity {})",
            self.capacity
        );

        for page_index in start / BITS_PER_PAGE..=end / BITS_PER_PAGE {
            let page_start = page_index * BITS_PER_PAGE;
            let lo = start.max(page_start) - page_start;
            let hi = end.min(page_start + BITS_PER_PAGE - 1) - page_start;
            let whole = lo == 0 && hi == BITS_PER_PAGE - 1;

            let Some(page) = self.page_containing(page_start, value) else {
                continue;
            };
            match (value, whole) {
                (true, true) => page.fill(),
                (false, true) => page.clear_all(),
                (true, false) => page.set_range(lo, hi),
                (false, false) => page.clear_range(lo, hi),
            }
        }
    }

    /// First set bit at or after `from`, or `None` when the rest of the segment is clear.
    ///
    /// Each page is read as it is visited; bits written concurrently into pages
    /// already passed are not seen.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        if from >= self.capacity {
            return None;
        }
        let mut offset = from % BITS_PER_PAGE;
        for page_index in from / BITS_PER_PAGE..self.pages.len() {
            let found = self.pages[page_index]
                .get()
                .and_then(|page| page.next_set_bit(offset));
            if let Some(bit) = found {
                return Some(page_index * BITS_PER_PAGE + bit);
            }
            offset = 0;
        }
        None
    }

    /// First clear bit at or after `from`, or [`capacity`](Self::capacity)
    /// when every remaining bit is set. Absent pages count as all clear.
    pub fn next_clear_bit(&self, from: usize) -> usize {
        if from >= self.capacity {
            return self.capacity;
        }
        let mut offset = from % BITS_PER_PAGE;
        for page_index in from / BITS_PER_PAGE..self.pages.len() {
            let page_start = page_index * BITS_PER_PAGE;
            let found = match self.pages[page_index].get() {
                None => Some(offset),
                Some(page) => page.next_clear_bit(offset),
            };
            if let Some(bit) = found {
                return (page_start + bit).min(self.capacity);
            }
            offset = 0;
        }
        self.capacity
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.pages
            .iter()
            .filter_map(OnceLock::get)
            .map(|page| page.count_ones())
            .sum()
    }
}

/// `[-,[01000000],-]`: one entry per page slot, `-` for pages never created.
impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('[')?;
        for (i, slot) in self.pages.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            match slot.get() {
                Some(page) => write!(f, "{page}")?,
                None => f.write_char('-')?,
            }
        }
        f.write_char(']')
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.capacity)
            .field("page_slots", &self.pages.len())
            .field("page_count", &self.page_count())
            .finish()
    }
}
