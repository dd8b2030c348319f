//! Utility functions for Mach-O parsing

use crate::error::{MachError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Width of the fixed, NUL-padded segment and section name fields.
pub const NAME_SIZE: usize = 16;

/// Byte order of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn is_little_endian(&self) -> bool {
        matches!(self, ByteOrder::Little)
    }
}

/// Trait for reading values with endianness support
pub trait EndianRead {
    fn read_u32(&self, offset: usize, order: ByteOrder) -> Result<u32>;
    fn read_u64(&self, offset: usize, order: ByteOrder) -> Result<u64>;
    fn read_i32(&self, offset: usize, order: ByteOrder) -> Result<i32>;
    fn read_name(&self, offset: usize) -> Result<[u8; NAME_SIZE]>;
}

fn field<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(MachError::Truncated {
            offset: offset as u64,
            needed: N as u64,
        })
}

impl EndianRead for [u8] {
    fn read_u32(&self, offset: usize, order: ByteOrder) -> Result<u32> {
        let bytes = field::<4>(self, offset)?;
        Ok(match order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, offset: usize, order: ByteOrder) -> Result<u64> {
        let bytes = field::<8>(self, offset)?;
        Ok(match order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }

    fn read_i32(&self, offset: usize, order: ByteOrder) -> Result<i32> {
        let bytes = field::<4>(self, offset)?;
        Ok(match order {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        })
    }

    fn read_name(&self, offset: usize) -> Result<[u8; NAME_SIZE]> {
        field::<NAME_SIZE>(self, offset)
    }
}

/// The significant bytes of a fixed-width name: up to the first NUL, or all
/// sixteen when the field is completely used.
pub fn name_bytes(raw: &[u8; NAME_SIZE]) -> &[u8] {
    let end = memchr::memchr(0, raw).unwrap_or(NAME_SIZE);
    &raw[..end]
}

/// Fixed-width name as text.
pub fn name_str(raw: &[u8; NAME_SIZE]) -> Cow<'_, str> {
    String::from_utf8_lossy(name_bytes(raw))
}

/// Copy a fixed-width name into `output`, never reading past the field.
/// Returns the number of significant bytes copied.
pub fn copy_name(raw: &[u8; NAME_SIZE], output: &mut [u8; NAME_SIZE]) -> usize {
    let name = name_bytes(raw);
    output.fill(0);
    output[..name.len()].copy_from_slice(name);
    name.len()
}
