//! Bit set data structures.
//!
//! # Submodules
//!
//! - [`sparse`]: thread-safe bit set over a huge logical range, allocated
//!   segment by segment and page by page as bits are written

pub mod sparse;
