#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Thread-safe sparse bit sets whose memory follows the regions written.
//!
//! ```
//! use sparsebits::BitSet;
//!
//! let bits = BitSet::default(); // 2^32 positions
//! bits.set_range(1_000_000, 1_000_063);
//! assert_eq!(bits.next_set_bit(0), Some(1_000_000));
//! assert_eq!(bits.cardinality(), 64);
//! ```

pub mod config;
pub mod error;
pub mod sets;
pub mod statistics;

pub use config::BitSetParams;
pub use error::{RangeError, Result};
pub use sets::sparse::BitSet;
pub use statistics::{Metrics, MetricsSnapshot};
