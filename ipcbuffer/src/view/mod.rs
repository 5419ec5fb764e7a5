//! The public buffer handle.
//!
//! A [`View`] is a window `(segment, offset, length)` onto a [`Segment`]. Views
//! never hold bytes themselves: cloning or slicing one yields another window on
//! the same segment, so writes through any of them are visible through all of
//! them, and through views in other processes when the segment is keyed.
//!
//! Nothing here synchronizes concurrent writers of overlapping ranges. Callers
//! that need single-writer discipline use [`crate::guard::GuardedView`] or
//! their own protocol.

use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::codec::{Encoding, Written};
use crate::core::{Segment, SegmentKey};
use crate::errors::{IpcBufferError, Result};
use crate::pool::{Allocate, Allocation, Dedicated, DefaultPool};

/// What a new view is built from.
#[derive(Clone, Copy, Debug)]
pub enum Source<'a> {
    /// `length` zeroed bytes.
    Length(usize),
    /// A copy of these bytes.
    Bytes(&'a [u8]),
    /// The text, encoded.
    Text(&'a str, Encoding),
    /// Another window on `view`'s segment, `offset` counted from the start
    /// of the segment rather than from the start of `view`.
    View {
        view: &'a View,
        length: usize,
        offset: usize,
    },
    /// A whole segment of `length` bytes bound to `key`.
    Key { length: usize, key: &'a SegmentKey },
}

#[derive(Clone)]
pub struct View {
    segment: Arc<Segment>,
    offset: usize,
    length: usize,
}

impl View {
    /// Builds a view, taking small allocations from the process-wide pool.
    pub fn new(source: Source<'_>) -> Result<View> {
        View::new_in(source, &mut DefaultPool)
    }

    /// Builds a view, taking storage from `alloc`.
    pub fn new_in<A>(source: Source<'_>, alloc: &mut A) -> Result<View>
    where
        A: Allocate + ?Sized,
    {
        match source {
            Source::Length(length) => Ok(View::from_allocation(alloc.allocate(length)?, length)),
            Source::Bytes(bytes) => {
                let view = View::from_allocation(alloc.allocate(bytes.len())?, bytes.len());
                view.segment.write_bytes(view.offset, bytes)?;
                Ok(view)
            }
            Source::Text(text, encoding) => {
                let estimate = View::byte_length(text, encoding);
                let mut view = View::from_allocation(alloc.allocate(estimate)?, estimate);
                if estimate > 0 {
                    view.length = view.write(text, 0, encoding)?;
                }
                Ok(view)
            }
            Source::View {
                view,
                length,
                offset,
            } => View::from_segment(Arc::clone(&view.segment), offset, length),
            Source::Key { length, key } => View::open(length, key),
        }
    }

    /// Builds a view over a whole segment bound to `key`, filled from
    /// `source`. Only `Length`, `Bytes` and `Text` sources can be placed.
    pub fn new_shared(source: Source<'_>, key: &SegmentKey) -> Result<View> {
        match source {
            Source::Length(_) | Source::Bytes(_) | Source::Text(..) => {
                View::new_in(source, &mut Dedicated { key })
            }
            Source::View { .. } | Source::Key { .. } => Err(IpcBufferError::InvalidArgument {
                position: 1,
                expected: "a length, bytes or text to place in a keyed segment",
            }),
        }
    }

    pub fn with_length(length: usize) -> Result<View> {
        View::new(Source::Length(length))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<View> {
        View::new(Source::Bytes(bytes))
    }

    pub fn from_text(text: &str, encoding: Encoding) -> Result<View> {
        View::new(Source::Text(text, encoding))
    }

    /// Attaches (creating if needed) the region bound to `key`. Never pooled.
    pub fn open(length: usize, key: &SegmentKey) -> Result<View> {
        let segment = Segment::create(length, Some(key))?;
        View::from_segment(Arc::new(segment), 0, length)
    }

    /// A window onto an existing segment.
    pub fn from_segment(segment: Arc<Segment>, offset: usize, length: usize) -> Result<View> {
        match offset.checked_add(length) {
            Some(end) if end <= segment.len() => Ok(View {
                segment,
                offset,
                length,
            }),
            _ => Err(IpcBufferError::out_of_bounds(
                "offset + length",
                offset.saturating_add(length),
                segment.len(),
            )),
        }
    }

    fn from_allocation(allocation: Allocation, length: usize) -> View {
        View {
            segment: allocation.segment,
            offset: allocation.offset,
            length,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Where this view starts inside its segment.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn is_shared(&self) -> bool {
        self.segment.is_shared()
    }

    pub fn shares_segment_with(&self, other: &View) -> bool {
        Arc::ptr_eq(&self.segment, &other.segment)
    }

    fn cells(&self) -> &[AtomicU8] {
        &self.segment.bytes()[self.offset..self.offset + self.length]
    }

    pub fn get(&self, index: usize) -> Result<u8> {
        if index >= self.length {
            return Err(IpcBufferError::out_of_bounds("index", index, self.length));
        }
        self.segment.get(self.offset + index)
    }

    pub fn set(&self, index: usize, value: u8) -> Result<()> {
        if index >= self.length {
            return Err(IpcBufferError::out_of_bounds("index", index, self.length));
        }
        self.segment.set(self.offset + index, value)
    }

    pub fn fill(&self, value: u8) {
        for cell in self.cells() {
            cell.store(value, Ordering::Relaxed);
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.cells().iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// A view of `range` on the same segment. Unlike [`View::decode`] nothing
    /// is clamped: `end > len` or `start > end` fail with `OutOfBounds`.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Result<View> {
        let (start, end) = bounds(&range, self.length);
        if end > self.length {
            return Err(IpcBufferError::out_of_bounds("end", end, self.length));
        }
        if start > end {
            return Err(IpcBufferError::out_of_bounds("start", start, end));
        }
        View::from_segment(Arc::clone(&self.segment), self.offset + start, end - start)
    }

    /// Encodes `text` at `offset`, returning the number of bytes written.
    /// Output that would run past the end of the view is cut at the last
    /// whole unit that fits.
    ///
    /// `offset` is checked against this view, not its segment: an offset
    /// past the end, or non-empty text at exactly the end, fails with
    /// `OutOfBounds`. Non-empty text into a zero-length view therefore fails
    /// rather than writing 0 bytes. Empty text at the end writes nothing.
    pub fn write(&self, text: &str, offset: usize, encoding: Encoding) -> Result<usize> {
        Ok(self.write_counted(text, offset, encoding)?.bytes)
    }

    /// [`View::write`], also reporting how many characters were consumed.
    pub fn write_counted(&self, text: &str, offset: usize, encoding: Encoding) -> Result<Written> {
        if offset > self.length || (offset == self.length && !text.is_empty()) {
            return Err(IpcBufferError::out_of_bounds("offset", offset, self.length));
        }
        let max_len = self.length - offset;
        self.segment
            .write(encoding, text, self.offset + offset, max_len)
    }

    /// Decodes `range` with `encoding`. Bounds past the end are clamped to
    /// the end; a range that starts after it ends fails with `InvalidRange`.
    pub fn decode<R: RangeBounds<usize>>(&self, encoding: Encoding, range: R) -> Result<String> {
        let (start, end) = bounds(&range, self.length);
        let (start, end) = (start.min(self.length), end.min(self.length));
        if start > end {
            return Err(IpcBufferError::InvalidRange { start, end });
        }
        if start == end {
            return Ok(String::new());
        }
        self.segment
            .slice(encoding, self.offset + start, self.offset + end)
    }

    /// Copies `range` of this view into `target` at `target_start`, returning
    /// the number of bytes copied.
    ///
    /// When `target` has less room than the range asks for, the copy is
    /// silently shortened instead of failing: a 10 byte range copied into a 3
    /// byte target copies 3 bytes and returns 3.
    pub fn copy<R: RangeBounds<usize>>(
        &self,
        target: &View,
        target_start: usize,
        range: R,
    ) -> Result<usize> {
        let (start, end) = bounds(&range, self.length);
        if end < start {
            return Err(IpcBufferError::InvalidRange { start, end });
        }
        if end == start || target.length == 0 || self.length == 0 {
            return Ok(0);
        }
        if target_start >= target.length {
            return Err(IpcBufferError::out_of_bounds(
                "targetStart",
                target_start,
                target.length,
            ));
        }
        if start >= self.length {
            return Err(IpcBufferError::out_of_bounds("sourceStart", start, self.length));
        }
        if end > self.length {
            return Err(IpcBufferError::out_of_bounds("sourceEnd", end, self.length));
        }

        let room = target.length - target_start;
        let end = if room < end - start { start + room } else { end };

        Segment::copy(
            &self.segment,
            &target.segment,
            target.offset + target_start,
            self.offset + start,
            self.offset + end,
        )
    }

    pub fn byte_length(text: &str, encoding: Encoding) -> usize {
        Segment::byte_length(text, encoding)
    }
}

fn bounds<R: RangeBounds<usize>>(range: &R, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    (start, end)
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<Buffer")?;
        for b in self.cells() {
            write!(f, " {:02x}", b.load(Ordering::Relaxed))?;
        }
        f.write_str(">")
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_vec()))
    }
}
