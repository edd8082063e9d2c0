use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::statistics::CounterSink;

/// The counters a sparse bit set maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    PagesCreated,
    SegmentsCreated,
    /// Lock acquisitions taken to materialize a segment, including the ones
    /// that found it already installed by another thread.
    SegmentMapLocks,
    /// Public `get`/`set` calls on the bit set.
    TotalOperations,
}

impl Counter {
    pub const ALL: [Counter; 4] = [
        Counter::PagesCreated,
        Counter::SegmentsCreated,
        Counter::SegmentMapLocks,
        Counter::TotalOperations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::PagesCreated => "pages_created",
            Counter::SegmentsCreated => "segments_created",
            Counter::SegmentMapLocks => "segment_map_locks",
            Counter::TotalOperations => "total_operations",
        }
    }
}

/// Monotonic counters shared by a bit set, its segments and their pages.
///
/// Counters only ever grow and are mutated through atomic increments, so a
/// single `Metrics` can be shared (through an `Arc`) by any number of threads
/// and even by several bit sets.
#[derive(Default)]
pub struct Metrics {
    pages_created: AtomicU64,
    segments_created: AtomicU64,
    segment_map_locks: AtomicU64,
    total_operations: AtomicU64,
    sink: Option<Arc<dyn CounterSink>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Counters that additionally forward every increment to `sink`.
    pub fn with_sink(sink: Arc<dyn CounterSink>) -> Self {
        Metrics {
            sink: Some(sink),
            ..Metrics::default()
        }
    }

    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::PagesCreated => &self.pages_created,
            Counter::SegmentsCreated => &self.segments_created,
            Counter::SegmentMapLocks => &self.segment_map_locks,
            Counter::TotalOperations => &self.total_operations,
        }
    }

    /// Record one occurrence of `counter`.
    #[inline]
    pub fn bump(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = &self.sink {
            sink.record(counter);
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    /// Reads all four counters.
    ///
    /// Each counter is read atomically, but the four reads are not taken as
    /// one transaction: increments racing with the snapshot may be reflected
    /// in some fields and not yet in others.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_created: self.get(Counter::PagesCreated),
            segments_created: self.get(Counter::SegmentsCreated),
            segment_map_locks: self.get(Counter::SegmentMapLocks),
            total_operations: self.get(Counter::TotalOperations),
        }
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pages_created: u64,
    pub segments_created: u64,
    pub segment_map_locks: u64,
    pub total_operations: u64,
}

impl MetricsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::PagesCreated => self.pages_created,
            Counter::SegmentsCreated => self.segments_created,
            Counter::SegmentMapLocks => self.segment_map_locks,
            Counter::TotalOperations => self.total_operations,
        }
    }

    /// Sum of two snapshots, e.g. of two bit sets with their own metrics.
    pub fn merge(&self, other: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_created: self.pages_created + other.pages_created,
            segments_created: self.segments_created + other.segments_created,
            segment_map_locks: self.segment_map_locks + other.segment_map_locks,
            total_operations: self.total_operations + other.total_operations,
        }
    }

    /// What happened between `earlier` and `self`.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_created: self.pages_created.saturating_sub(earlier.pages_created),
            segments_created: self
                .segments_created
                .saturating_sub(earlier.segments_created),
            segment_map_locks: self
                .segment_map_locks
                .saturating_sub(earlier.segment_map_locks),
            total_operations: self
                .total_operations
                .saturating_sub(earlier.total_operations),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages created : {}, segments created : {}, segment map locks : {}, total operations : {}",
            self.pages_created, self.segments_created, self.segment_map_locks, self.total_operations
        )
    }
}
