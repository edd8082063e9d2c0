use std::{
    fmt::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    config::{BitSetParams, Layout},
    error::Result,
    sets::sparse::{BITS_PER_PAGE, Segment, SegmentMapEntry},
    statistics::{Counter, Metrics, MetricsSnapshot},
};

/// Upper bound on the number of mutexes guarding segment creation.
const CREATION_LOCK_STRIPES: usize = 64;

/// A thread-safe bit set over `size` logical positions whose memory grows
/// only with the regions actually written.
///
/// The logical range is cut into segments of `2^log2_segment_size` bits and
/// each segment into pages of [`BITS_PER_PAGE`](crate::sets::sparse::BITS_PER_PAGE)
/// bits. Both are created on the first write that lands in them and are never
/// freed, so every method takes `&self` and a `BitSet` can be shared between
/// threads as is (typically behind an `Arc`).
///
/// # Examples
///
/// ```
/// use sparsebits::BitSet;
///
/// let bits = BitSet::new(1 << 20).unwrap();
/// assert!(!bits.get(500_000));
///
/// bits.set(500_000, true);
/// assert!(bits.get(500_000));
///
/// let metrics = bits.metrics();
/// assert_eq!(metrics.segments_created, 1);
/// assert_eq!(metrics.pages_created, 1);
/// ```
///
/// # Panics
///
/// Every index-taking method panics when the index (or range end) is not
/// below [`size`](Self::size), the same way slice indexing does.
pub struct BitSet {
    size: u64,
    log2_segment_size: u32,
    segment_map: Box<[SegmentMapEntry]>,
    creation_locks: Box<[Mutex<()>]>,
    metrics: Arc<Metrics>,
}

impl BitSet {
    /// A bit set of `size` positions using the default segment size.
    pub fn new(size: i64) -> Result<Self> {
        Self::from_params(&BitSetParams {
            size,
            ..BitSetParams::default()
        })
    }

    /// A bit set of `size` positions cut into segments of `2^log2_segment_size` bits.
    ///
    /// ```
    /// use sparsebits::BitSet;
    ///
    /// assert!(BitSet::with_log2_segment_size(1 << 20, 18).is_ok());
    /// assert_eq!(BitSet::with_log2_segment_size(1 << 20, 99).unwrap_err().attempted, 99);
    /// assert_eq!(BitSet::with_log2_segment_size(-1, 18).unwrap_err().name, "size");
    /// ```
    pub fn with_log2_segment_size(size: i64, log2_segment_size: i32) -> Result<Self> {
        Self::from_params(&BitSetParams::new(size, log2_segment_size))
    }

    pub fn from_params(params: &BitSetParams) -> Result<Self> {
        Self::with_metrics(params, Arc::new(Metrics::new()))
    }

    /// Like [`from_params`](Self::from_params), reporting into existing
    /// metrics, e.g. ones carrying a sink or shared with other bit sets.
    pub fn with_metrics(params: &BitSetParams, metrics: Arc<Metrics>) -> Result<Self> {
        let layout = params.layout()?;
        Ok(Self::from_layout(layout, metrics))
    }

    fn from_layout(layout: Layout, metrics: Arc<Metrics>) -> Self {
        let stripes = layout.segment_count.clamp(1, CREATION_LOCK_STRIPES);
        debug!(
            size = layout.size,
            log2_segment_size = layout.log2_segment_size,
            segments = layout.segment_count,
            "created sparse bit set"
        );
        if layout.segment_size() < BITS_PER_PAGE as u64 {
            debug!(
                segment_size = layout.segment_size(),
                page_size = BITS_PER_PAGE,
                "segments are smaller than a page; each materialized segment still allocates a full page"
            );
        }
        BitSet {
            size: layout.size,
            log2_segment_size: layout.log2_segment_size,
            segment_map: (0..layout.segment_count)
                .map(|_| SegmentMapEntry::new())
                .collect(),
            creation_locks: (0..stripes).map(|_| Mutex::new(())).collect(),
            metrics,
        }
    }

    /// Declared logical capacity.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn log2_segment_size(&self) -> u32 {
        self.log2_segment_size
    }

    /// Bits per segment.
    pub fn segment_size(&self) -> u64 {
        1 << self.log2_segment_size
    }

    /// Number of segment slots, materialized or not.
    pub fn segment_count(&self) -> usize {
        self.segment_map.len()
    }

    pub fn materialized_segments(&self) -> usize {
        self.segment_map.iter().filter(|e| !e.is_empty()).count()
    }

    /// The segment slot at `segment_index`.
    pub fn segment(&self, segment_index: usize) -> Option<&Segment> {
        self.segment_map.get(segment_index)?.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[inline]
    fn decompose(&self, index: u64) -> (usize, usize) {
        let segment_index = (index >> self.log2_segment_size) as usize;
        let offset = (index & (self.segment_size() - 1)) as usize;
        (segment_index, offset)
    }

    #[inline]
    fn compose(&self, segment_index: usize, offset: usize) -> u64 {
        ((segment_index as u64) << self.log2_segment_size) | offset as u64
    }

    #[inline]
    fn locate(&self, index: u64) -> (usize, usize) {
        assert!(
            index < self.size,
            "index {index} out of bounds (size {})",
            self.size
        );
        self.decompose(index)
    }

    /// Double-checked creation of the segment at `segment_index`.
    ///
    /// Callers have already seen the slot empty without locking. Under the
    /// stripe lock the slot is checked again, so a segment installed by a
    /// concurrent writer in the meantime is reused rather than replaced.
    fn create_segment(&self, segment_index: usize) -> &Segment {
        let entry = &self.segment_map[segment_index];
        let stripe = &self.creation_locks[segment_index % self.creation_locks.len()];
        let _guard = stripe.lock().unwrap_or_else(PoisonError::into_inner);
        self.metrics.bump(Counter::SegmentMapLocks);

        if let Some(segment) = entry.get() {
            return segment;
        }

        let segment = Box::new(Segment::new(
            self.log2_segment_size,
            Arc::clone(&self.metrics),
        ));
        match entry.set(segment) {
            Ok(installed) => {
                self.metrics.bump(Counter::SegmentsCreated);
                debug!(segment = segment_index, "materialized segment");
                installed
            }
            Err(existing) => existing,
        }
    }

    pub fn get(&self, index: u64) -> bool {
        self.metrics.bump(Counter::TotalOperations);
        let (segment_index, offset) = self.locate(index);
        self.segment_map[segment_index]
            .get()
            .is_some_and(|segment| segment.get(offset))
    }

    /// Writes `value` at `index`. Clearing a bit in a region that was never
    /// written is a no-op and allocates nothing.
    pub fn set(&self, index: u64, value: bool) {
        self.metrics.bump(Counter::TotalOperations);
        let (segment_index, offset) = self.locate(index);
        match self.segment_map[segment_index].get() {
            Some(segment) => segment.set(offset, value),
            None if value => self.create_segment(segment_index).set(offset, value),
            None => {}
        }
    }

    /// Sets every bit in `start..=end`.
    pub fn set_range(&self, start: u64, end: u64) {
        self.apply_range(start, end, true);
    }

    /// Clears every bit in `start..=end`.
    pub fn clear_range(&self, start: u64, end: u64) {
        self.apply_range(start, end, false);
    }

    fn apply_range(&self, start: u64, end: u64, value: bool) {
        assert!(
            start <= end && end < self.size,
            "range {start}..={end} out of bounds (size {})",
            self.size
        );
        let (first, first_offset) = self.decompose(start);
        let (last, last_offset) = self.decompose(end);
        let segment_end = (self.segment_size() - 1) as usize;

        for segment_index in first..=last {
            let lo = if segment_index == first { first_offset } else { 0 };
            let hi = if segment_index == last { last_offset } else { segment_end };
            let segment = match self.segment_map[segment_index].get() {
                Some(segment) => segment,
                None if value => self.create_segment(segment_index),
                None => continue,
            };
            if value {
                segment.set_range(lo, hi);
            } else {
                segment.clear_range(lo, hi);
            }
        }
    }

    /// First set bit at or after `from`.
    ///
    /// Weakly consistent under concurrent writes: each page is observed as it
    /// is visited.
    pub fn next_set_bit(&self, from: u64) -> Option<u64> {
        if from >= self.size {
            return None;
        }
        let (first, mut offset) = self.decompose(from);
        for segment_index in first..self.segment_map.len() {
            let found = self.segment_map[segment_index]
                .get()
                .and_then(|segment| segment.next_set_bit(offset));
            if let Some(bit) = found {
                return Some(self.compose(segment_index, bit));
            }
            offset = 0;
        }
        None
    }

    /// First clear bit at or after `from`, or [`size`](Self::size) if there is none.
    pub fn next_clear_bit(&self, from: u64) -> u64 {
        if from >= self.size {
            return self.size;
        }
        let segment_size = self.segment_size() as usize;
        let (first, mut offset) = self.decompose(from);
        for segment_index in first..self.segment_map.len() {
            let bit = match self.segment_map[segment_index].get() {
                Some(segment) => segment.next_clear_bit(offset),
                None => offset,
            };
            if bit < segment_size {
                return self.compose(segment_index, bit).min(self.size);
            }
            offset = 0;
        }
        self.size
    }

    /// Indices of all set bits in ascending order.
    pub fn iter_ones(&self) -> Ones<'_> {
        Ones {
            bit_set: self,
            from: 0,
        }
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> u64 {
        self.segment_map
            .iter()
            .filter_map(SegmentMapEntry::get)
            .map(|segment| segment.cardinality() as u64)
            .sum()
    }
}

impl Default for BitSet {
    fn default() -> Self {
        Self::from_layout(Layout::default(), Arc::new(Metrics::new()))
    }
}

/// Iterator returned by [`BitSet::iter_ones`].
pub struct Ones<'a> {
    bit_set: &'a BitSet,
    from: u64,
}

impl Iterator for Ones<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let bit = self.bit_set.next_set_bit(self.from)?;
        self.from = bit + 1;
        Some(bit)
    }
}

/// One entry per segment slot, `-` for slots never materialized.
impl fmt::Display for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('[')?;
        for (i, entry) in self.segment_map.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{entry}")?;
        }
        f.write_char(']')
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitSet")
            .field("size", &self.size)
            .field("log2_segment_size", &self.log2_segment_size)
            .field("segment_count", &self.segment_count())
            .field("materialized_segments", &self.materialized_segments())
            .field("metrics", &self.metrics())
            .finish()
    }
}
