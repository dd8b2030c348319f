//! Half-open address ranges and the containment test.
//!
//! A [`VmRange`] is the `(address, size)` pair every node validates against
//! its parent. Containment is the one check no child may skip: a range is only
//! accepted once it is provably inside the parent's validated range.

use crate::core::address::{self, VmAddress, VmOffset, VmSize};
use crate::error::{MachError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous region `[address, address + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRange {
    /// The first address of the range (inclusive)
    pub address: VmAddress,
    /// The size of the range in bytes
    pub size: VmSize,
}

impl VmRange {
    pub const fn new(address: VmAddress, size: VmSize) -> Self {
        Self { address, size }
    }

    /// One past the last address, overflow-checked.
    pub fn end(&self) -> Result<VmAddress> {
        address::add(self.address, self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether `address` falls inside the range.
    pub fn contains_address(&self, address: VmAddress) -> Result<bool> {
        let end = self.end()?;
        Ok(address >= self.address && address < end)
    }

    /// Whether `inner` lies entirely inside `self`.
    ///
    /// An empty `inner` is only accepted when `allow_empty` is set, and then
    /// only if its address lies within `[self.address, self.end]`. A non-empty
    /// `inner` is never contained in an empty `self`. Both ends are computed
    /// with checked arithmetic, so a wrapping range fails rather than passing.
    pub fn contains_range(&self, inner: &VmRange, allow_empty: bool) -> Result<bool> {
        let outer_end = self.end()?;
        let inner_end = inner.end()?;

        if inner.is_empty() {
            return Ok(allow_empty && inner.address >= self.address && inner.address <= outer_end);
        }
        if self.is_empty() {
            return Ok(false);
        }

        Ok(inner.address >= self.address && inner_end <= outer_end)
    }

    /// Like [`contains_range`](Self::contains_range) but reports a miss as a
    /// `ContainmentViolation`.
    pub fn check_contains(&self, inner: &VmRange, allow_empty: bool) -> Result<()> {
        if self.contains_range(inner, allow_empty)? {
            Ok(())
        } else {
            Err(MachError::ContainmentViolation {
                outer: *self,
                inner: *inner,
            })
        }
    }

    /// The range of `size` bytes starting `offset` bytes from this range's start.
    /// Containment is not checked.
    pub fn offset_range(&self, offset: VmOffset, size: VmSize) -> Result<VmRange> {
        let start = address::apply_offset(self.address, offset)?;
        let range = VmRange::new(start, size);
        range.end()?;
        Ok(range)
    }

    /// Byte distance from this range's start to `address`.
    pub fn offset_of(&self, address: VmAddress) -> Result<VmSize> {
        address::distance(self.address, address)
    }
}

/// Free-function form of [`VmRange::contains_range`].
pub fn range_contains(outer: VmRange, inner: VmRange, allow_empty: bool) -> Result<bool> {
    outer.contains_range(&inner, allow_empty)
}

impl fmt::Display for VmRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Ok(end) => write!(f, "[{:#x}, {:#x})", self.address, end),
            Err(_) => write!(f, "[{:#x}, +{:#x})", self.address, self.size),
        }
    }
}
