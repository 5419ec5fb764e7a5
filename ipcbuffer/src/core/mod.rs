//! Raw segments: fixed-length byte stores, private to the process or mapped
//! from a named / keyed shared memory region.
//!
//! All byte traffic goes through relaxed `AtomicU8` loads and stores. Nothing
//! here orders or locks concurrent writers, callers sharing a region across
//! threads or processes bring their own protocol (see [`crate::guard`]).

use std::fmt;
use std::path::PathBuf;
use std::slice;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use ::shared_memory::{Shmem, ShmemConf, ShmemError};
use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::codec::{self, Encoding, Written};
use crate::errors::{IpcBufferError, Result};

/// Binds a segment to a region other processes can attach to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKey {
    /// POSIX shared memory object. A leading `*` is accepted and ignored.
    Name(String),
    /// Link file on disk naming the region.
    Path(PathBuf),
    /// Numeric key, System V style.
    Id(u32),
}

impl SegmentKey {
    fn os_id(&self) -> Option<String> {
        match self {
            SegmentKey::Name(name) => {
                let name = name.trim_start_matches('*');
                if name.starts_with('/') {
                    Some(name.to_string())
                } else {
                    Some(format!("/{}", name))
                }
            }
            SegmentKey::Id(id) => Some(format!("/ipcbuffer.{:08x}", id)),
            SegmentKey::Path(_) => None,
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKey::Name(name) => write!(f, "*{}", name.trim_start_matches('*')),
            SegmentKey::Path(path) => write!(f, "{}", path.display()),
            SegmentKey::Id(id) => write!(f, "{}", id),
        }
    }
}

/// `*name` is a shared memory name, a non-zero integer a numeric key and
/// anything else a link file path.
impl FromStr for SegmentKey {
    type Err = IpcBufferError;

    fn from_str(s: &str) -> Result<SegmentKey> {
        if s.is_empty() || s == "*" {
            return Err(IpcBufferError::InvalidArgument {
                position: 1,
                expected: "a non-empty segment name, key or path",
            });
        }
        if s.starts_with('*') {
            return Ok(SegmentKey::Name(s.to_string()));
        }
        match s.parse::<u32>() {
            Ok(0) => Err(IpcBufferError::InvalidArgument {
                position: 1,
                expected: "a non-zero numeric key",
            }),
            Ok(id) => Ok(SegmentKey::Id(id)),
            Err(_) => Ok(SegmentKey::Path(PathBuf::from(s))),
        }
    }
}

/// Where a keyed view lives, as read from a config file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SegmentConfig {
    pub key: String,
    pub length: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            key: "*ipcbuffer".to_string(),
            length: 16 * 1024 * 1024,
        }
    }
}

impl SegmentConfig {
    pub fn key(&self) -> Result<SegmentKey> {
        self.key.parse()
    }
}

enum Storage {
    Heap(Box<[AtomicU8]>),
    Mapped(Shmem),
}

pub struct Segment {
    key: Option<SegmentKey>,
    len: usize,
    storage: Storage,
}

// SAFETY: the mapping stays valid for the lifetime of the Segment and the
// bytes are only ever touched through atomics.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("key", &self.key)
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl Segment {
    /// Allocates `len` zeroed private bytes, or attaches the region named by
    /// `key`, creating it when it does not exist yet.
    pub fn create(len: usize, key: Option<&SegmentKey>) -> Result<Segment> {
        match key {
            None => {
                let mut cells = Vec::new();
                cells
                    .try_reserve_exact(len)
                    .map_err(|_| IpcBufferError::AllocationFailed { requested: len })?;
                cells.extend((0..len).map(|_| AtomicU8::new(0)));
                Ok(Segment {
                    key: None,
                    len,
                    storage: Storage::Heap(cells.into_boxed_slice()),
                })
            }
            Some(key) => Segment::create_mapped(len, Some(key)),
        }
    }

    /// Like [`Segment::create`] but always backed by a memory mapping, even
    /// without a key.
    pub fn create_mapped(len: usize, key: Option<&SegmentKey>) -> Result<Segment> {
        if len == 0 {
            return Err(IpcBufferError::InvalidArgument {
                position: 1,
                expected: "a non-zero length for a mapped segment",
            });
        }
        let shmem = match key {
            None => ShmemConf::new().size(len).create()?,
            Some(key) => attach(len, key)?,
        };
        if shmem.len() < len {
            return Err(IpcBufferError::SegmentTooSmall {
                requested: len,
                actual: shmem.len(),
            });
        }
        debug!(
            "mapped segment {} ({} bytes, owner: {})",
            shmem.get_os_id(),
            len,
            shmem.is_owner()
        );
        Ok(Segment {
            key: key.cloned(),
            len,
            storage: Storage::Mapped(shmem),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key(&self) -> Option<&SegmentKey> {
        self.key.as_ref()
    }

    pub fn is_shared(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Whether this process created the region and unlinks it on drop.
    /// Private segments are always owned.
    pub fn is_owner(&self) -> bool {
        match &self.storage {
            Storage::Heap(_) => true,
            Storage::Mapped(shmem) => shmem.is_owner(),
        }
    }

    pub(crate) fn bytes(&self) -> &[AtomicU8] {
        match &self.storage {
            Storage::Heap(bytes) => bytes,
            // SAFETY: AtomicU8 has the layout of u8 and the mapping holds at
            // least `len` bytes for as long as `shmem` lives.
            Storage::Mapped(shmem) => unsafe {
                slice::from_raw_parts(shmem.as_ptr() as *const AtomicU8, self.len)
            },
        }
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.bytes().as_ptr() as *mut u8
    }

    pub fn get(&self, index: usize) -> Result<u8> {
        self.bytes()
            .get(index)
            .map(|b| b.load(Ordering::Relaxed))
            .ok_or_else(|| IpcBufferError::out_of_bounds("index", index, self.len))
    }

    pub fn set(&self, index: usize, value: u8) -> Result<()> {
        self.bytes()
            .get(index)
            .map(|b| b.store(value, Ordering::Relaxed))
            .ok_or_else(|| IpcBufferError::out_of_bounds("index", index, self.len))
    }

    /// Copies `start..end` out of the segment.
    pub fn read(&self, start: usize, end: usize) -> Result<Vec<u8>> {
        if end < start {
            return Err(IpcBufferError::InvalidRange { start, end });
        }
        if end > self.len {
            return Err(IpcBufferError::out_of_bounds("end", end, self.len));
        }
        Ok(self.bytes()[start..end]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect())
    }

    /// Stores as much of `bytes` as fits from `offset` on, returning the count.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<usize> {
        if offset > self.len {
            return Err(IpcBufferError::out_of_bounds("offset", offset, self.len));
        }
        let cells = &self.bytes()[offset..];
        let count = bytes.len().min(cells.len());
        for (cell, &b) in cells.iter().zip(&bytes[..count]) {
            cell.store(b, Ordering::Relaxed);
        }
        Ok(count)
    }

    /// Decodes `start..end` with `encoding`.
    pub fn slice(&self, encoding: Encoding, start: usize, end: usize) -> Result<String> {
        Ok(codec::decode(encoding, &self.read(start, end)?))
    }

    /// Encodes `text` at `offset`, writing no more than `max_len` bytes and
    /// never past the end of the segment.
    pub fn write(
        &self,
        encoding: Encoding,
        text: &str,
        offset: usize,
        max_len: usize,
    ) -> Result<Written> {
        if offset > self.len || (offset == self.len && !text.is_empty()) {
            return Err(IpcBufferError::out_of_bounds("offset", offset, self.len));
        }
        let max_len = max_len.min(self.len - offset);
        let (bytes, written) = codec::encode(encoding, text, max_len);
        self.write_bytes(offset, &bytes)?;
        Ok(written)
    }

    /// Copies `src[src_start..src_end]` into `dst` at `dst_start`, truncated
    /// to what `dst` can hold. Overlapping ranges of one region behave like
    /// `memmove`, also when `src` and `dst` are separate handles to it.
    pub fn copy(
        src: &Segment,
        dst: &Segment,
        dst_start: usize,
        src_start: usize,
        src_end: usize,
    ) -> Result<usize> {
        if src_end < src_start {
            return Err(IpcBufferError::InvalidRange {
                start: src_start,
                end: src_end,
            });
        }
        if src_end == src_start {
            return Ok(0);
        }
        if dst_start >= dst.len {
            return Err(IpcBufferError::out_of_bounds("targetStart", dst_start, dst.len));
        }
        if src_start >= src.len {
            return Err(IpcBufferError::out_of_bounds("sourceStart", src_start, src.len));
        }
        if src_end > src.len {
            return Err(IpcBufferError::out_of_bounds("sourceEnd", src_end, src.len));
        }

        let to_copy = (src_end - src_start).min(dst.len - dst_start);
        let from = &src.bytes()[src_start..src_start + to_copy];
        let to = &dst.bytes()[dst_start..dst_start + to_copy];
        let load_store =
            |(f, t): (&AtomicU8, &AtomicU8)| t.store(f.load(Ordering::Relaxed), Ordering::Relaxed);
        if std::ptr::eq(src, dst) {
            if dst_start > src_start {
                from.iter().zip(to).rev().for_each(load_store);
            } else {
                from.iter().zip(to).for_each(load_store);
            }
        } else if src.is_mapped() && dst.is_mapped() {
            // Two handles may map one region at different addresses.
            let staged: Vec<u8> = from.iter().map(|b| b.load(Ordering::Relaxed)).collect();
            for (cell, b) in to.iter().zip(staged) {
                cell.store(b, Ordering::Relaxed);
            }
        } else {
            from.iter().zip(to).for_each(load_store);
        }
        Ok(to_copy)
    }

    pub fn byte_length(text: &str, encoding: Encoding) -> usize {
        codec::byte_length(text, encoding)
    }
}

fn attach(len: usize, key: &SegmentKey) -> Result<Shmem> {
    match key {
        SegmentKey::Path(path) => match ShmemConf::new().size(len).flink(path).create() {
            Ok(v) => Ok(v),
            Err(ShmemError::LinkExists) => Ok(ShmemConf::new().flink(path).open()?),
            Err(e) => Err(e.into()),
        },
        _ => {
            let os_id = key.os_id().unwrap_or_default();
            match ShmemConf::new().size(len).os_id(&os_id).create() {
                Ok(v) => Ok(v),
                Err(ShmemError::MappingIdExists) => Ok(ShmemConf::new().os_id(&os_id).open()?),
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::process;

    use super::*;
    use crate::tests::unique_name;

    #[test]
    fn private_segments_start_zeroed() -> Result<()> {
        let seg = Segment::create(16, None)?;
        assert_eq!(seg.len(), 16);
        assert!(!seg.is_shared());
        assert!(!seg.is_mapped());
        assert_eq!(seg.read(0, 16)?, vec![0u8; 16]);
        Ok(())
    }

    #[test]
    fn oversized_private_segments_fail_cleanly() {
        assert!(matches!(
            Segment::create(usize::MAX, None),
            Err(IpcBufferError::AllocationFailed { requested: usize::MAX })
        ));
    }

    #[test]
    fn get_and_set_are_bounds_checked() -> Result<()> {
        let seg = Segment::create(4, None)?;
        seg.set(3, 7)?;
        assert_eq!(seg.get(3)?, 7);
        assert!(matches!(seg.get(4), Err(IpcBufferError::OutOfBounds { .. })));
        assert!(matches!(seg.set(4, 1), Err(IpcBufferError::OutOfBounds { .. })));
        Ok(())
    }

    #[test]
    fn read_rejects_reversed_and_long_ranges() -> Result<()> {
        let seg = Segment::create(4, None)?;
        assert!(matches!(seg.read(3, 2), Err(IpcBufferError::InvalidRange { .. })));
        assert!(matches!(seg.read(0, 5), Err(IpcBufferError::OutOfBounds { .. })));
        assert!(seg.read(4, 4)?.is_empty());
        Ok(())
    }

    #[test]
    fn write_clamps_to_max_len() -> Result<()> {
        let seg = Segment::create(8, None)?;
        let written = seg.write(Encoding::Utf8, "abcdef", 2, 3)?;
        assert_eq!(written.bytes, 3);
        assert_eq!(seg.read(0, 8)?, b"\0\0abc\0\0\0".to_vec());

        let written = seg.write(Encoding::Base64, "aGVsbG8gd29ybGQ=", 6, 100)?;
        assert_eq!(written.bytes, 2);
        assert_eq!(seg.slice(Encoding::Utf8, 6, 8)?, "he");
        Ok(())
    }

    #[test]
    fn write_at_the_end_is_out_of_bounds() -> Result<()> {
        let seg = Segment::create(2, None)?;
        assert!(matches!(
            seg.write(Encoding::Utf8, "x", 2, 10),
            Err(IpcBufferError::OutOfBounds { .. })
        ));
        assert_eq!(seg.write(Encoding::Utf8, "", 2, 10)?.bytes, 0);
        Ok(())
    }

    #[test]
    fn copy_truncates_to_destination() -> Result<()> {
        let src = Segment::create(10, None)?;
        src.write_bytes(0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])?;
        let dst = Segment::create(3, None)?;
        assert_eq!(Segment::copy(&src, &dst, 0, 0, 10)?, 3);
        assert_eq!(dst.read(0, 3)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn copy_within_one_segment_is_a_memmove() -> Result<()> {
        let seg = Segment::create(6, None)?;
        seg.write_bytes(0, &[1, 2, 3, 4, 5, 6])?;
        assert_eq!(Segment::copy(&seg, &seg, 2, 0, 4)?, 4);
        assert_eq!(seg.read(0, 6)?, vec![1, 2, 1, 2, 3, 4]);

        seg.write_bytes(0, &[1, 2, 3, 4, 5, 6])?;
        assert_eq!(Segment::copy(&seg, &seg, 0, 2, 6)?, 4);
        assert_eq!(seg.read(0, 6)?, vec![3, 4, 5, 6, 5, 6]);
        Ok(())
    }

    #[test]
    fn copy_checks_its_arguments() -> Result<()> {
        let src = Segment::create(4, None)?;
        let dst = Segment::create(4, None)?;
        assert!(matches!(
            Segment::copy(&src, &dst, 0, 3, 1),
            Err(IpcBufferError::InvalidRange { .. })
        ));
        assert_eq!(Segment::copy(&src, &dst, 9, 2, 2)?, 0);
        assert!(matches!(
            Segment::copy(&src, &dst, 4, 0, 1),
            Err(IpcBufferError::OutOfBounds { what: "targetStart", .. })
        ));
        assert!(matches!(
            Segment::copy(&src, &dst, 0, 4, 5),
            Err(IpcBufferError::OutOfBounds { what: "sourceStart", .. })
        ));
        assert!(matches!(
            Segment::copy(&src, &dst, 0, 0, 5),
            Err(IpcBufferError::OutOfBounds { what: "sourceEnd", .. })
        ));
        Ok(())
    }

    #[test]
    fn parses_keys() -> Result<()> {
        assert_eq!("*buffy".parse::<SegmentKey>()?, SegmentKey::Name("*buffy".to_string()));
        assert_eq!("1234".parse::<SegmentKey>()?, SegmentKey::Id(1234));
        assert_eq!(
            "buffy.buf".parse::<SegmentKey>()?,
            SegmentKey::Path(PathBuf::from("buffy.buf"))
        );
        assert!("0".parse::<SegmentKey>().is_err());
        assert!("".parse::<SegmentKey>().is_err());
        Ok(())
    }

    #[test]
    fn named_segments_are_shared_between_mappings() -> Result<(), Box<dyn Error>> {
        let key = SegmentKey::Name(unique_name("named"));
        let first = Segment::create(64, Some(&key))?;
        let second = Segment::create(64, Some(&key))?;
        assert!(first.is_owner());
        assert!(!second.is_owner());

        first.set(10, 42)?;
        assert_eq!(second.get(10)?, 42);
        second.write(Encoding::Utf8, "shared", 20, 64)?;
        assert_eq!(first.slice(Encoding::Utf8, 20, 26)?, "shared");
        Ok(())
    }

    #[test]
    fn numeric_keys_are_shared_between_mappings() -> Result<(), Box<dyn Error>> {
        let id = 0x4000_0000 | (process::id() & 0x0fff_ffff);
        let key = SegmentKey::Id(id);
        let first = Segment::create(32, Some(&key))?;
        let second = Segment::create(32, Some(&key))?;
        first.set(0, 9)?;
        assert_eq!(second.get(0)?, 9);
        Ok(())
    }

    #[test]
    fn link_files_are_shared_between_mappings() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let key = SegmentKey::Path(dir.path().join("buffy.buf"));
        let first = Segment::create(128, Some(&key))?;
        let second = Segment::create(128, Some(&key))?;
        first.write_bytes(100, b"xyz")?;
        assert_eq!(second.read(100, 103)?, b"xyz".to_vec());
        Ok(())
    }

    #[test]
    fn opening_a_smaller_region_fails() -> Result<(), Box<dyn Error>> {
        let key = SegmentKey::Name(unique_name("small"));
        let _first = Segment::create(16, Some(&key))?;
        match Segment::create(1 << 20, Some(&key)) {
            Err(IpcBufferError::SegmentTooSmall { requested, .. }) => assert_eq!(requested, 1 << 20),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn zero_length_mappings_are_rejected() {
        let key = SegmentKey::Name(unique_name("zero"));
        assert!(matches!(
            Segment::create(0, Some(&key)),
            Err(IpcBufferError::InvalidArgument { .. })
        ));
    }
}
