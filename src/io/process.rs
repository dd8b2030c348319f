//! Memory maps over a live task's virtual memory.
//!
//! Reads are copied out of the task when an object is initialized, so a page
//! unmapped between validation and read surfaces as an ordinary
//! `BackingStoreUnavailable` failure, never as a short read.

use crate::config::IoLimits;
use crate::core::address::{VmAddress, VmOffset, VmSize};
use crate::core::address_range::VmRange;
use crate::error::{MachError, Result};
use crate::io::{resolve_request, Addressing, MappedObject, MemoryMap, ObjectLedger};
use bytes::Bytes;
use std::io;
use tracing::{debug, trace, warn};

/// Read access to the address space of a task.
pub trait TaskMemory {
    /// Fill `buf` with the bytes at `address`. A partial read is an error.
    fn read_memory(&self, address: VmAddress, buf: &mut [u8]) -> io::Result<()>;

    /// Whether the task still exists.
    fn is_alive(&self) -> bool {
        true
    }
}

/// A memory map whose addresses are virtual addresses in a task.
pub struct ProcessMemoryMap<T: TaskMemory> {
    task: T,
    limits: IoLimits,
    ledger: ObjectLedger,
}

impl<T: TaskMemory> ProcessMemoryMap<T> {
    pub fn new(task: T, limits: IoLimits) -> Self {
        Self {
            task,
            limits,
            ledger: ObjectLedger::default(),
        }
    }

    pub fn task(&self) -> &T {
        &self.task
    }
}

impl<T: TaskMemory> MemoryMap for ProcessMemoryMap<T> {
    fn addressing(&self) -> Addressing {
        Addressing::VmAddresses
    }

    fn extent(&self) -> Option<VmRange> {
        None
    }

    fn init_object(
        &self,
        offset: VmOffset,
        address: VmAddress,
        size: VmSize,
        allow_empty: bool,
    ) -> Result<MappedObject> {
        let range = resolve_request(
            offset,
            address,
            size,
            allow_empty,
            Some(self.limits.max_object_size),
        )?;

        let mut buf = vec![0u8; crate::core::address::to_usize(size)?];
        if !buf.is_empty() {
            self.task.read_memory(range.address, &mut buf).map_err(|e| {
                debug!(range = %range, error = %e, "Task read failed");
                MachError::unavailable(range, e)
            })?;
        }

        trace!(range = %range, "Mapped task window");
        Ok(MappedObject::new(range, Bytes::from(buf), self.ledger.issue()))
    }

    fn free_object(&self, object: MappedObject) -> Result<()> {
        let range = object.range();
        drop(object);

        if self.task.is_alive() {
            trace!(range = %range, "Released task window");
            Ok(())
        } else {
            warn!(range = %range, "Released window of a task that no longer exists");
            Err(MachError::unavailable(range, "task no longer exists"))
        }
    }

    fn live_objects(&self) -> usize {
        self.ledger.live()
    }
}

/// A task reconstructed from captured memory regions, such as a core file.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTask {
    regions: Vec<(VmAddress, Bytes)>,
}

impl SnapshotTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a captured region starting at `address`.
    pub fn with_region(mut self, address: VmAddress, data: impl Into<Bytes>) -> Self {
        self.regions.push((address, data.into()));
        self
    }

    /// The region holding all of `wanted`, with `wanted`'s offset into it.
    fn region_for(&self, wanted: &VmRange) -> Option<(usize, &Bytes)> {
        self.regions.iter().find_map(|(base, data)| {
            let region = VmRange::new(*base, data.len() as u64);
            match region.contains_range(wanted, false) {
                Ok(true) => {
                    let start = region.offset_of(wanted.address).ok()?;
                    Some((usize::try_from(start).ok()?, data))
                }
                _ => None,
            }
        })
    }
}

impl TaskMemory for SnapshotTask {
    fn read_memory(&self, address: VmAddress, buf: &mut [u8]) -> io::Result<()> {
        let wanted = VmRange::new(address, buf.len() as u64);
        let (start, data) = self.region_for(&wanted).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is not captured in a single region", wanted),
            )
        })?;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }
}

/// A live Linux process read through `/proc/<pid>/mem`.
#[cfg(target_os = "linux")]
pub struct ProcMemTask {
    pid: u32,
    mem: std::fs::File,
}

#[cfg(target_os = "linux")]
impl ProcMemTask {
    /// Open the memory of process `pid`. Requires ptrace access to it.
    pub fn attach(pid: u32) -> Result<Self> {
        let path = format!("/proc/{}/mem", pid);
        let mem = std::fs::File::open(&path)
            .map_err(|e| MachError::unavailable(VmRange::new(0, 0), format!("{}: {}", path, e)))?;
        debug!(pid, "Attached to task memory");
        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(target_os = "linux")]
impl TaskMemory for ProcMemTask {
    fn read_memory(&self, address: VmAddress, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.mem.read_exact_at(buf, address)
    }

    fn is_alive(&self) -> bool {
        std::path::Path::new(&format!("/proc/{}", self.pid)).exists()
    }
}
