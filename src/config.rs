//! Construction parameters for [`BitSet`](crate::BitSet) and their validation.
//!
//! Parameters are plain data that can be written by hand, deserialized from
//! JSON, or filled in from the command line. [`BitSetParams::layout`] is the
//! single place where they are checked and turned into the geometry a bit set
//! is built from.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{RangeError, Result};
use crate::sets::sparse::BITS_PER_PAGE;

/// Logical capacity used when none is given.
pub const DEFAULT_SIZE: i64 = 1 << 32;

/// Bits per segment, as a power of two, used when none is given.
pub const DEFAULT_LOG2_SEGMENT_SIZE: i32 = 20;

/// Smallest accepted segment size, as a power of two.
///
/// Pages are the unit of allocation, so a segment below [`BITS_PER_PAGE`]
/// bits still materializes a whole 512-byte page on its first write. At
/// `log2_segment_size = 1` that is 512 bytes for every 2 addressable bits.
pub const MIN_LOG2_SEGMENT_SIZE: i32 = 1;
pub const MAX_LOG2_SEGMENT_SIZE: i32 = 30;

/// Largest logical capacity accepted.
pub const MAX_SIZE: i64 = 1 << 48;

/// Upper bound on the number of segment slots. Each empty slot still costs a
/// pointer-sized cell, so tiny segments over a huge range are refused.
pub const MAX_SEGMENTS: i64 = 1 << 22;

/// Construction parameters of a sparse bit set.
///
/// Missing fields fall back to their defaults when deserializing:
///
/// ```
/// use sparsebits::config::{BitSetParams, DEFAULT_LOG2_SEGMENT_SIZE};
///
/// let params = BitSetParams::from_json_str(r#"{ "size": 1048576 }"#).unwrap();
/// assert_eq!(params.size, 1 << 20);
/// assert_eq!(params.log2_segment_size, DEFAULT_LOG2_SEGMENT_SIZE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitSetParams {
    pub size: i64,
    pub log2_segment_size: i32,
}

impl Default for BitSetParams {
    fn default() -> Self {
        BitSetParams {
            size: DEFAULT_SIZE,
            log2_segment_size: DEFAULT_LOG2_SEGMENT_SIZE,
        }
    }
}

/// Validated geometry derived from [`BitSetParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub log2_segment_size: u32,
    pub segment_count: usize,
}

/// Geometry of [`BitSetParams::default`], which needs no validation.
impl Default for Layout {
    fn default() -> Self {
        Layout {
            size: DEFAULT_SIZE as u64,
            log2_segment_size: DEFAULT_LOG2_SEGMENT_SIZE as u32,
            segment_count: (DEFAULT_SIZE >> DEFAULT_LOG2_SEGMENT_SIZE) as usize,
        }
    }
}

impl Layout {
    pub fn segment_size(&self) -> u64 {
        1 << self.log2_segment_size
    }

    /// Number of page slots each segment carries.
    pub fn pages_per_segment(&self) -> usize {
        (self.segment_size() as usize).div_ceil(BITS_PER_PAGE)
    }
}

impl BitSetParams {
    pub fn new(size: i64, log2_segment_size: i32) -> Self {
        BitSetParams {
            size,
            log2_segment_size,
        }
    }

    /// Checks every parameter and computes the segment map length.
    ///
    /// The checks run in a fixed order (size, then segment size, then the
    /// resulting segment count) and the first violation is reported.
    pub fn layout(&self) -> Result<Layout> {
        let size = RangeError::check(0, MAX_SIZE, self.size, "size")? as u64;
        let log2_segment_size = RangeError::check(
            MIN_LOG2_SEGMENT_SIZE as i64,
            MAX_LOG2_SEGMENT_SIZE as i64,
            self.log2_segment_size as i64,
            "log2_segment_size",
        )? as u32;

        let segment_count = size.div_ceil(1 << log2_segment_size);
        let segment_count =
            RangeError::check(0, MAX_SEGMENTS, segment_count as i64, "segment_count")? as usize;

        Ok(Layout {
            size,
            log2_segment_size,
            segment_count,
        })
    }

    pub fn from_json_str(json: &str) -> std::result::Result<Self, ConfigError> {
        let params: BitSetParams = serde_json::from_str(json)?;
        params.layout()?;
        Ok(params)
    }

    /// Reads and validates parameters from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// Failure to obtain usable parameters from an external source.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Range(#[from] RangeError),
}
