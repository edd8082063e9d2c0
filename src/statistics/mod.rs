//! Allocation and lock instrumentation for sparse bit sets.
//!
//! This module provides the shared atomic counters every layer of a
//! [`BitSet`](crate::BitSet) reports to, the plain snapshot value they can be
//! read into, and the optional sink that forwards every increment elsewhere.

mod metrics;
mod sink;

pub use metrics::*;
pub use sink::*;
