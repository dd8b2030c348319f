//! Memory maps: turning validated ranges into readable windows of bytes.
//!
//! A [`MemoryMap`] is the backing store of one image. Nodes ask it for a
//! [`MappedObject`] covering their validated range and hand the object back
//! through [`MemoryMap::free_object`] when they are freed. Two backing stores
//! are provided: [`FileMemoryMap`] reads a file's bytes (addresses are file
//! offsets, no slide) and [`process::ProcessMemoryMap`] reads a live task's
//! virtual memory (addresses are slid VM addresses).

pub mod process;

use crate::config::IoLimits;
use crate::core::address::{self, VmAddress, VmOffset, VmSize};
use crate::core::address_range::VmRange;
use crate::error::{MachError, Result};
use crate::formats::macho::utils::{ByteOrder, EndianRead};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What the addresses handed to a memory map mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Addressing {
    /// Addresses are offsets into a file image.
    FileOffsets,
    /// Addresses are (slid) virtual addresses in a task.
    VmAddresses,
}

/// A backing store able to produce windows of bytes for validated ranges.
pub trait MemoryMap {
    /// How node addresses translate into this store.
    fn addressing(&self) -> Addressing;

    /// The full addressable extent, when the store has one.
    fn extent(&self) -> Option<VmRange>;

    /// Map `size` bytes at `address + offset`.
    ///
    /// Zero-size requests fail unless `allow_empty` is set.
    fn init_object(
        &self,
        offset: VmOffset,
        address: VmAddress,
        size: VmSize,
        allow_empty: bool,
    ) -> Result<MappedObject>;

    /// Release an object obtained from this map.
    ///
    /// The object is released whatever the outcome; an error only reports
    /// that the backing store was already gone.
    fn free_object(&self, object: MappedObject) -> Result<()>;

    /// Number of objects handed out and not yet released.
    fn live_objects(&self) -> usize;
}

/// Counts outstanding mapped objects of one memory map.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectLedger(Arc<AtomicUsize>);

impl ObjectLedger {
    pub(crate) fn issue(&self) -> Lease {
        self.0.fetch_add(1, Ordering::Relaxed);
        Lease(Arc::clone(&self.0))
    }

    pub(crate) fn live(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Held by a mapped object; returns its slot to the ledger when dropped.
#[derive(Debug)]
pub(crate) struct Lease(Arc<AtomicUsize>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A validated, readable window of bytes.
///
/// Objects cannot be cloned; each is released exactly once, either through
/// [`MemoryMap::free_object`] or when it is dropped.
pub struct MappedObject {
    range: VmRange,
    data: Bytes,
    _lease: Lease,
}

impl MappedObject {
    pub(crate) fn new(range: VmRange, data: Bytes, lease: Lease) -> Self {
        debug_assert_eq!(data.len() as u64, range.size);
        Self {
            range,
            data,
            _lease: lease,
        }
    }

    /// The range this window covers, in the map's address space.
    pub fn range(&self) -> VmRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// `length` bytes starting `offset` bytes into the window.
    pub fn read_at(&self, offset: VmSize, length: VmSize) -> Result<&[u8]> {
        let end = address::add(offset, length)?;
        if end > self.range.size {
            return Err(MachError::ContainmentViolation {
                outer: self.range,
                inner: VmRange::new(address::add(self.range.address, offset)?, length),
            });
        }
        let start = address::to_usize(offset)?;
        let end = address::to_usize(end)?;
        Ok(&self.data[start..end])
    }

    /// Everything from `offset` to the end of the window.
    pub fn tail(&self, offset: VmSize) -> Result<&[u8]> {
        let remaining = address::distance(offset, self.range.size)?;
        self.read_at(offset, remaining)
    }

    /// The bytes at `address + offset`, which must lie inside the window.
    pub fn remap_address(
        &self,
        offset: VmOffset,
        address: VmAddress,
        length: VmSize,
    ) -> Result<&[u8]> {
        let target = address::apply_offset(address, offset)?;
        let wanted = VmRange::new(target, length);
        self.range.check_contains(&wanted, true)?;
        self.read_at(self.range.offset_of(target)?, length)
    }

    pub fn read_u32(&self, offset: VmSize, order: ByteOrder) -> Result<u32> {
        let start = address::to_usize(offset)?;
        self.data[..].read_u32(start, order)
    }

    pub fn read_u64(&self, offset: VmSize, order: ByteOrder) -> Result<u64> {
        let start = address::to_usize(offset)?;
        self.data[..].read_u64(start, order)
    }
}

impl fmt::Debug for MappedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedObject")
            .field("range", &self.range)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Validate a mapping request common to every backing store.
pub(crate) fn resolve_request(
    offset: VmOffset,
    address: VmAddress,
    size: VmSize,
    allow_empty: bool,
    max_size: Option<VmSize>,
) -> Result<VmRange> {
    let start = address::apply_offset(address, offset)?;
    let range = VmRange::new(start, size);
    range.end()?;

    if size == 0 && !allow_empty {
        return Err(MachError::invalid(format!(
            "zero-size mapping requested at {:#x}",
            start
        )));
    }
    if let Some(limit) = max_size.filter(|&limit| size > limit) {
        warn!(range = %range, limit, "Mapping request exceeds object size limit");
        return Err(MachError::unavailable(
            range,
            format!("exceeds the {} byte object limit", limit),
        ));
    }
    Ok(range)
}

/// A memory map over a file image.
///
/// Addresses are offsets into the file. The image is either memory-mapped
/// from disk or supplied as an owned buffer.
pub struct FileMemoryMap {
    name: String,
    data: Bytes,
    limits: IoLimits,
    ledger: ObjectLedger,
}

impl FileMemoryMap {
    /// Opens and memory-maps a file.
    ///
    /// Fails if the file size exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: IoLimits) -> Result<Self> {
        let path = path.as_ref();
        let whole_file = |len| VmRange::new(0, len);
        let file = File::open(path).map_err(|e| MachError::unavailable(whole_file(0), e))?;
        let file_size = file
            .metadata()
            .map_err(|e| MachError::unavailable(whole_file(0), e))?
            .len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening file memory map"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(MachError::unavailable(
                whole_file(file_size),
                format!("file exceeds the {} byte limit", limits.max_file_size),
            ));
        }

        // memmap cannot map empty files
        let data = if file_size == 0 {
            Bytes::new()
        } else {
            // Safety: the map is read-only and the file is not modified through
            // this process while the map is alive.
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| MachError::unavailable(whole_file(file_size), e))?;
            Bytes::from_owner(mmap)
        };

        Ok(Self {
            name: path.display().to_string(),
            data,
            limits,
            ledger: ObjectLedger::default(),
        })
    }

    /// Wraps an in-memory image.
    pub fn from_bytes(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        limits: IoLimits,
    ) -> Result<Self> {
        let data = data.into();
        if data.len() as u64 > limits.max_file_size {
            return Err(MachError::unavailable(
                VmRange::new(0, data.len() as u64),
                format!("image exceeds the {} byte limit", limits.max_file_size),
            ));
        }
        Ok(Self {
            name: name.into(),
            data,
            limits,
            ledger: ObjectLedger::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size of the image in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The limits the image was opened under.
    pub fn limits(&self) -> &IoLimits {
        &self.limits
    }
}

impl MemoryMap for FileMemoryMap {
    fn addressing(&self) -> Addressing {
        Addressing::FileOffsets
    }

    fn extent(&self) -> Option<VmRange> {
        Some(VmRange::new(0, self.size()))
    }

    fn init_object(
        &self,
        offset: VmOffset,
        address: VmAddress,
        size: VmSize,
        allow_empty: bool,
    ) -> Result<MappedObject> {
        // file windows are zero-copy slices, so only the file size is bounded
        let range = resolve_request(offset, address, size, allow_empty, None)?;
        let extent = VmRange::new(0, self.size());

        if !extent.contains_range(&range, allow_empty)? {
            debug!(
                file = %self.name,
                range = %range,
                size = self.size(),
                "Range beyond end of file"
            );
            return Err(MachError::unavailable(range, "range lies beyond the end of the file"));
        }

        let start = address::to_usize(range.address)?;
        let end = address::to_usize(range.end()?)?;
        trace!(file = %self.name, range = %range, "Mapped file window");
        Ok(MappedObject::new(range, self.data.slice(start..end), self.ledger.issue()))
    }

    fn free_object(&self, object: MappedObject) -> Result<()> {
        trace!(file = %self.name, range = %object.range(), "Released file window");
        drop(object);
        Ok(())
    }

    fn live_objects(&self) -> usize {
        self.ledger.live()
    }
}
