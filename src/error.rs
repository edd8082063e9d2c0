//! Error types for bit set construction.
//!
//! The only detectable failures are precondition violations on the
//! construction parameters. They are reported once, synchronously, and the
//! caller is expected to retry with valid parameters.

use thiserror::Error;

/// Result type used by every fallible operation of the crate.
pub type Result<T> = std::result::Result<T, RangeError>;

/// A parameter fell outside its accepted inclusive range.
///
/// Bounds and the attempted value are kept signed so that negative requests
/// (e.g. a size of `-1`) can be reported as they were made.
///
/// # Examples
///
/// ```
/// use sparsebits::BitSet;
///
/// let err = BitSet::with_log2_segment_size(1 << 20, 99).unwrap_err();
/// assert_eq!(err.attempted, 99);
/// assert_eq!(err.name, "log2_segment_size");
/// ```
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{name} must be within [{minimum}, {maximum}], got {attempted}")]
pub struct RangeError {
    pub minimum: i64,
    pub maximum: i64,
    pub attempted: i64,
    pub name: &'static str,
}

impl RangeError {
    pub fn new(minimum: i64, maximum: i64, attempted: i64, name: &'static str) -> Self {
        RangeError {
            minimum,
            maximum,
            attempted,
            name,
        }
    }

    /// Returns `Ok(attempted)` when it lies in `[minimum, maximum]`, or the
    /// matching error otherwise.
    pub fn check(minimum: i64, maximum: i64, attempted: i64, name: &'static str) -> Result<i64> {
        if (minimum..=maximum).contains(&attempted) {
            Ok(attempted)
        } else {
            Err(RangeError::new(minimum, maximum, attempted, name))
        }
    }
}
