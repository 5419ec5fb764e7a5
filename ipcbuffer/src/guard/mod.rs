//! Opt-in single-writer discipline for shared views.
//!
//! A [`GuardedView`] keeps a process-shared mutex in front of its data inside
//! one mapped segment. The data is reachable only through the guard returned
//! by [`GuardedView::lock`], so every process that goes through a
//! `GuardedView` for the same key takes turns. Views cloned out of a guard
//! escape it; keeping them inside the critical section is up to the caller.
//!
//! The creating process initialises the lock, so it must be done creating
//! before anyone else opens the same key.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use raw_sync::Timeout;

use crate::core::{Segment, SegmentKey};
use crate::errors::{IpcBufferError, Result};
use crate::view::View;

const HEADER_ALIGN: usize = 64;

pub struct GuardedView {
    lock: Box<dyn LockImpl>,
    data: View,
}

impl GuardedView {
    /// Creates or opens a guarded region with `length` data bytes. Without a
    /// key the region is an anonymous mapping private to this process.
    pub fn create(length: usize, key: Option<&SegmentKey>) -> Result<GuardedView> {
        let header = header_len();
        let segment = Arc::new(Segment::create_mapped(header + length, key)?);
        let base = segment.as_mut_ptr();

        // SAFETY: `base` points at `header` bytes reserved for the lock inside
        // a live mapping, which `data` keeps alive for as long as the lock.
        let (lock, _) = unsafe {
            let data = base.add(header);
            if segment.is_owner() {
                Mutex::new(base, data)
            } else {
                Mutex::from_existing(base, data)
            }
        }
        .map_err(|e| IpcBufferError::Lock(e.to_string()))?;
        debug!(
            "guarded view of {} bytes ({} lock)",
            length,
            if segment.is_owner() { "new" } else { "existing" }
        );

        let data = View::from_segment(segment, header, length)?;
        Ok(GuardedView { lock, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Blocks until this process holds the lock.
    pub fn lock(&self) -> Result<GuardedAccess<'_>> {
        let guard = self
            .lock
            .lock()
            .map_err(|e| IpcBufferError::Lock(e.to_string()))?;
        Ok(GuardedAccess {
            view: &self.data,
            _guard: guard,
        })
    }

    /// Like [`GuardedView::lock`], giving up after `timeout`.
    pub fn try_lock(&self, timeout: Duration) -> Result<GuardedAccess<'_>> {
        let guard = self
            .lock
            .try_lock(Timeout::Val(timeout))
            .map_err(|e| IpcBufferError::Lock(e.to_string()))?;
        Ok(GuardedAccess {
            view: &self.data,
            _guard: guard,
        })
    }
}

fn header_len() -> usize {
    let size = Mutex::size_of(None);
    (size + HEADER_ALIGN - 1) / HEADER_ALIGN * HEADER_ALIGN
}

/// The data view, usable while the lock is held. Dropping it unlocks.
pub struct GuardedAccess<'a> {
    view: &'a View,
    _guard: LockGuard<'a>,
}

impl Deref for GuardedAccess<'_> {
    type Target = View;

    fn deref(&self) -> &View {
        self.view
    }
}
