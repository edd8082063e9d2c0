//! Two-level lazily allocated bit set.
//!
//! A [`BitSet`] owns a fixed array of [`SegmentMapEntry`] slots, each of which
//! may hold a [`Segment`], which in turn owns a fixed array of optional
//! [`Page`]s. Segments and pages are created on first write under a narrowly
//! scoped lock and are never replaced or freed, so reads of anything already
//! created are lock-free.

mod bit_set;
mod page;
mod segment;
mod segment_map;

pub use bit_set::*;
pub use page::*;
pub use segment::*;
pub use segment_map::*;
