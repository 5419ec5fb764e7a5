//! Small allocations are carved out of one private pool segment.
//!
//! The pool is a bump allocator: sub-ranges are never reused or freed. When a
//! request does not fit in what is left, the current segment is abandoned to
//! the views still pointing into it and a fresh one takes its place. Space
//! held by dropped views is only given back when the last view sharing the
//! same pool segment goes away.

use std::sync::{Arc, Mutex};

use log::{debug, trace};
use once_cell::sync::OnceCell;
use serde_derive::{Deserialize, Serialize};

use crate::core::{Segment, SegmentKey};
use crate::errors::{IpcBufferError, Result};

pub const DEFAULT_POOL_SIZE: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Requests above this many bytes bypass the pool.
    pub pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// A byte range handed out by an allocator.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub segment: Arc<Segment>,
    pub offset: usize,
}

/// Source of backing storage for new views.
pub trait Allocate {
    fn allocate(&mut self, length: usize) -> Result<Allocation>;
}

#[derive(Debug)]
pub struct Pool {
    pool_size: usize,
    current: Option<Arc<Segment>>,
    used: usize,
    segments_created: usize,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Pool {
        Pool::with_pool_size(config.pool_size)
    }

    pub fn with_pool_size(pool_size: usize) -> Pool {
        Pool {
            pool_size,
            current: None,
            used: 0,
            segments_created: 0,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes left in the current pool segment, 0 before the first refill.
    pub fn remaining(&self) -> usize {
        match self.current {
            Some(_) => self.pool_size - self.used,
            None => 0,
        }
    }

    /// Pool segments allocated so far. Dedicated allocations are not counted.
    pub fn segments_created(&self) -> usize {
        self.segments_created
    }

    pub fn current_segment(&self) -> Option<&Arc<Segment>> {
        self.current.as_ref()
    }

    fn refill(&mut self) -> Result<Arc<Segment>> {
        let segment = Arc::new(Segment::create(self.pool_size, None)?);
        debug!(
            "new pool segment of {} bytes ({} left unused in the previous one)",
            self.pool_size,
            self.remaining()
        );
        self.current = Some(Arc::clone(&segment));
        self.used = 0;
        self.segments_created += 1;
        Ok(segment)
    }
}

impl Allocate for Pool {
    fn allocate(&mut self, length: usize) -> Result<Allocation> {
        if length > self.pool_size {
            trace!("dedicated segment of {} bytes", length);
            return Ok(Allocation {
                segment: Arc::new(Segment::create(length, None)?),
                offset: 0,
            });
        }

        let segment = match self.current.clone() {
            Some(segment) if self.pool_size - self.used >= length => segment,
            _ => self.refill()?,
        };
        let offset = self.used;
        self.used += length;
        Ok(Allocation { segment, offset })
    }
}

/// The process-wide pool behind [`crate::View::new`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPool;

impl Allocate for DefaultPool {
    fn allocate(&mut self, length: usize) -> Result<Allocation> {
        default_pool().lock()?.allocate(length)
    }
}

/// Always hands out a whole segment bound to `key`.
#[derive(Clone, Copy, Debug)]
pub struct Dedicated<'a> {
    pub key: &'a SegmentKey,
}

impl Allocate for Dedicated<'_> {
    fn allocate(&mut self, length: usize) -> Result<Allocation> {
        Ok(Allocation {
            segment: Arc::new(Segment::create(length, Some(self.key))?),
            offset: 0,
        })
    }
}

static DEFAULT_POOL: OnceCell<Mutex<Pool>> = OnceCell::new();

/// Sets up the process-wide pool. Only possible before it is first used.
pub fn configure(config: PoolConfig) -> Result<()> {
    DEFAULT_POOL
        .set(Mutex::new(Pool::new(config)))
        .map_err(|_| IpcBufferError::AlreadyConfigured)
}

pub fn default_pool() -> &'static Mutex<Pool> {
    DEFAULT_POOL.get_or_init(|| Mutex::new(Pool::new(PoolConfig::default())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocations_share_one_segment() -> Result<()> {
        let mut pool = Pool::with_pool_size(64);
        let a = pool.allocate(10)?;
        let b = pool.allocate(20)?;
        assert!(Arc::ptr_eq(&a.segment, &b.segment));
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 10);
        assert_eq!(pool.used(), 30);
        assert_eq!(pool.remaining(), 34);
        assert_eq!(pool.segments_created(), 1);
        Ok(())
    }

    #[test]
    fn exhaustion_starts_exactly_one_fresh_segment() -> Result<()> {
        let mut pool = Pool::with_pool_size(32);
        let first = pool.allocate(16)?;
        let second = pool.allocate(16)?;
        assert_eq!(pool.segments_created(), 1);
        assert!(Arc::ptr_eq(&first.segment, &second.segment));

        let third = pool.allocate(1)?;
        assert_eq!(pool.segments_created(), 2);
        assert!(!Arc::ptr_eq(&first.segment, &third.segment));
        assert_eq!(third.offset, 0);

        let fourth = pool.allocate(31)?;
        assert_eq!(pool.segments_created(), 2);
        assert!(Arc::ptr_eq(&third.segment, &fourth.segment));
        assert_eq!(fourth.offset, 1);
        Ok(())
    }

    #[test]
    fn oversized_requests_never_touch_the_pool() -> Result<()> {
        let mut pool = Pool::new(PoolConfig::default());
        let big = pool.allocate(9000)?;
        assert_eq!(big.offset, 0);
        assert_eq!(big.segment.len(), 9000);
        assert_eq!(pool.segments_created(), 0);
        assert!(pool.current_segment().is_none());

        let small = pool.allocate(100)?;
        assert_eq!(pool.segments_created(), 1);
        assert_eq!(small.segment.len(), DEFAULT_POOL_SIZE);
        Ok(())
    }

    #[test]
    fn a_request_of_exactly_pool_size_uses_the_pool() -> Result<()> {
        let mut pool = Pool::with_pool_size(16);
        let a = pool.allocate(16)?;
        assert_eq!(a.segment.len(), 16);
        assert_eq!(pool.segments_created(), 1);
        assert_eq!(pool.remaining(), 0);
        Ok(())
    }
}
