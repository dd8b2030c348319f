//! Virtual-address arithmetic.
//!
//! Addresses, sizes and offsets read out of an image are untrusted. A wrapped
//! address can defeat a later bounds check, so every combination of them goes
//! through the checked helpers in this module instead of raw integer math.

use crate::error::{MachError, Result};

/// An address in the memory map's address space.
pub type VmAddress = u64;
/// A byte count.
pub type VmSize = u64;
/// A signed displacement, such as an ASLR slide.
pub type VmOffset = i64;

/// `address + size`, failing instead of wrapping.
pub fn add(address: VmAddress, size: VmSize) -> Result<VmAddress> {
    address.checked_add(size).ok_or(MachError::Overflow {
        base: address,
        operand: size,
    })
}

/// `address - size`, failing instead of wrapping below zero.
pub fn subtract(address: VmAddress, size: VmSize) -> Result<VmAddress> {
    address.checked_sub(size).ok_or(MachError::Underflow {
        base: address,
        operand: size,
    })
}

/// Displace `address` by a signed `offset`.
pub fn apply_offset(address: VmAddress, offset: VmOffset) -> Result<VmAddress> {
    if offset >= 0 {
        add(address, offset.unsigned_abs())
    } else {
        subtract(address, offset.unsigned_abs())
    }
}

/// Number of bytes from `start` up to `end`; fails if `end` precedes `start`.
pub fn distance(start: VmAddress, end: VmAddress) -> Result<VmSize> {
    end.checked_sub(start).ok_or(MachError::Underflow {
        base: end,
        operand: start,
    })
}

/// Reinterpret a size as a non-negative offset.
pub fn size_to_offset(size: VmSize) -> Result<VmOffset> {
    VmOffset::try_from(size).map_err(|_| MachError::Overflow {
        base: size,
        operand: 0,
    })
}

/// Narrow a 64-bit quantity to a host index.
pub fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| MachError::Overflow {
        base: value,
        operand: 0,
    })
}
