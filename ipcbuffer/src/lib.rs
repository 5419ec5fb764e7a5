//! Byte buffers whose storage can live in memory shared between processes.
//!
//! A [`View`] is a window onto a [`Segment`]. Small views are carved out of a
//! per-process pool, larger ones get a segment of their own, and a keyed view
//! maps a region that any process naming the same [`SegmentKey`] attaches to.

pub mod codec;
pub mod core;
pub mod errors;
pub mod guard;
pub mod legacy;
pub mod pool;
pub mod view;

#[cfg(test)]
mod tests;

pub use crate::codec::{Encoding, Written};
pub use crate::core::{Segment, SegmentConfig, SegmentKey};
pub use crate::errors::{IpcBufferError, Result};
pub use crate::guard::GuardedView;
pub use crate::pool::{Pool, PoolConfig, DEFAULT_POOL_SIZE};
pub use crate::view::{Source, View};
