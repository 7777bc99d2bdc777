//! Utility modules
//!
//! Shared building blocks for the worker hot path.

pub mod buffer;
pub mod fast_time;
