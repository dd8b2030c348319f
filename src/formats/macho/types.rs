//! Core Mach-O types and constants

use crate::error::{MachError, Result};
use crate::formats::macho::utils::{ByteOrder, EndianRead};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mach-O magic numbers, as read in the image's own byte order
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;
pub const FAT_CIGAM_64: u32 = 0xbfba_feca;

/// Load command kinds
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SEGMENT_64: u32 = 0x19;

/// Fixed record sizes
pub const MACH_HEADER_SIZE: u64 = 28;
pub const MACH_HEADER_64_SIZE: u64 = 32;
pub const LOAD_COMMAND_SIZE: u64 = 8;
pub const SEGMENT_COMMAND_SIZE: u64 = 56;
pub const SEGMENT_COMMAND_64_SIZE: u64 = 72;
pub const SECTION_SIZE: u64 = 68;
pub const SECTION_64_SIZE: u64 = 80;

/// Section `flags` masks
pub const SECTION_TYPE: u32 = 0x0000_00ff;
pub const SECTION_ATTRIBUTES: u32 = 0xffff_ff00;

/// Width of an image or of one segment's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordSize {
    Bits32,
    Bits64,
}

impl WordSize {
    pub fn bits(&self) -> u8 {
        match self {
            WordSize::Bits32 => 32,
            WordSize::Bits64 => 64,
        }
    }

    pub fn header_size(&self) -> u64 {
        match self {
            WordSize::Bits32 => MACH_HEADER_SIZE,
            WordSize::Bits64 => MACH_HEADER_64_SIZE,
        }
    }

    pub fn segment_command_size(&self) -> u64 {
        match self {
            WordSize::Bits32 => SEGMENT_COMMAND_SIZE,
            WordSize::Bits64 => SEGMENT_COMMAND_64_SIZE,
        }
    }

    pub fn section_size(&self) -> u64 {
        match self {
            WordSize::Bits32 => SECTION_SIZE,
            WordSize::Bits64 => SECTION_64_SIZE,
        }
    }

    /// The segment command kind carrying records of this width.
    pub fn segment_command(&self) -> u32 {
        match self {
            WordSize::Bits32 => LC_SEGMENT,
            WordSize::Bits64 => LC_SEGMENT_64,
        }
    }
}

/// Identify a thin Mach-O image from its first four bytes (read big-endian).
pub fn identify_magic(raw: [u8; 4]) -> Result<(WordSize, ByteOrder)> {
    let magic = u32::from_be_bytes(raw);
    match magic {
        MH_MAGIC => Ok((WordSize::Bits32, ByteOrder::Big)),
        MH_MAGIC_64 => Ok((WordSize::Bits64, ByteOrder::Big)),
        MH_CIGAM => Ok((WordSize::Bits32, ByteOrder::Little)),
        MH_CIGAM_64 => Ok((WordSize::Bits64, ByteOrder::Little)),
        FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64 => Err(MachError::malformed(
            0,
            "fat archive; select an architecture slice before parsing",
        )),
        other => Err(MachError::malformed(0, format!("bad magic {:#010x}", other))),
    }
}

/// The Mach header at the start of every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    /// Present only in 64-bit headers
    pub reserved: Option<u32>,
    pub word_size: WordSize,
    pub byte_order: ByteOrder,
}

impl MachHeader {
    /// Decode a header from `data`, which starts at the magic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw = data.get(..4).and_then(|b| b.try_into().ok()).ok_or(MachError::Truncated {
            offset: 0,
            needed: 4,
        })?;
        let (word_size, byte_order) = identify_magic(raw)?;
        let le = byte_order;

        Ok(Self {
            magic: data.read_u32(0, le)?,
            cputype: data.read_i32(4, le)?,
            cpusubtype: data.read_i32(8, le)?,
            filetype: data.read_u32(12, le)?,
            ncmds: data.read_u32(16, le)?,
            sizeofcmds: data.read_u32(20, le)?,
            flags: data.read_u32(24, le)?,
            reserved: match word_size {
                WordSize::Bits32 => None,
                WordSize::Bits64 => Some(data.read_u32(28, le)?),
            },
            word_size,
            byte_order,
        })
    }

    pub fn size(&self) -> u64 {
        self.word_size.header_size()
    }
}

/// Section type, the low byte of a section's `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionType {
    Regular,
    ZeroFill,
    CStringLiterals,
    FourByteLiterals,
    EightByteLiterals,
    LiteralPointers,
    NonLazySymbolPointers,
    LazySymbolPointers,
    SymbolStubs,
    ModInitFuncPointers,
    ModTermFuncPointers,
    Coalesced,
    GbZeroFill,
    Interposing,
    SixteenByteLiterals,
    DtraceDof,
    LazyDylibSymbolPointers,
    ThreadLocalRegular,
    ThreadLocalZeroFill,
    ThreadLocalVariables,
    ThreadLocalVariablePointers,
    ThreadLocalInitFunctionPointers,
    InitFuncOffsets,
    Other(u8),
}

impl From<u8> for SectionType {
    fn from(val: u8) -> Self {
        match val {
            0x00 => SectionType::Regular,
            0x01 => SectionType::ZeroFill,
            0x02 => SectionType::CStringLiterals,
            0x03 => SectionType::FourByteLiterals,
            0x04 => SectionType::EightByteLiterals,
            0x05 => SectionType::LiteralPointers,
            0x06 => SectionType::NonLazySymbolPointers,
            0x07 => SectionType::LazySymbolPointers,
            0x08 => SectionType::SymbolStubs,
            0x09 => SectionType::ModInitFuncPointers,
            0x0a => SectionType::ModTermFuncPointers,
            0x0b => SectionType::Coalesced,
            0x0c => SectionType::GbZeroFill,
            0x0d => SectionType::Interposing,
            0x0e => SectionType::SixteenByteLiterals,
            0x0f => SectionType::DtraceDof,
            0x10 => SectionType::LazyDylibSymbolPointers,
            0x11 => SectionType::ThreadLocalRegular,
            0x12 => SectionType::ThreadLocalZeroFill,
            0x13 => SectionType::ThreadLocalVariables,
            0x14 => SectionType::ThreadLocalVariablePointers,
            0x15 => SectionType::ThreadLocalInitFunctionPointers,
            0x16 => SectionType::InitFuncOffsets,
            other => SectionType::Other(other),
        }
    }
}

impl SectionType {
    /// Zero-fill sections occupy memory but no file bytes.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self,
            SectionType::ZeroFill | SectionType::GbZeroFill | SectionType::ThreadLocalZeroFill
        )
    }
}

bitflags! {
    /// Section attributes, the high 24 bits of a section's `flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x8000_0000;
        const NO_TOC = 0x4000_0000;
        const STRIP_STATIC_SYMS = 0x2000_0000;
        const NO_DEAD_STRIP = 0x1000_0000;
        const LIVE_SUPPORT = 0x0800_0000;
        const SELF_MODIFYING_CODE = 0x0400_0000;
        const DEBUG = 0x0200_0000;
        const SOME_INSTRUCTIONS = 0x0000_0400;
        const EXT_RELOC = 0x0000_0200;
        const LOC_RELOC = 0x0000_0100;
    }
}

bitflags! {
    /// Virtual memory protection of a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VmProt: i32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXECUTE = 0x4;
    }
}

impl fmt::Display for VmProt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(3);
        perms.push(if self.contains(VmProt::READ) { 'r' } else { '-' });
        perms.push(if self.contains(VmProt::WRITE) { 'w' } else { '-' });
        perms.push(if self.contains(VmProt::EXECUTE) { 'x' } else { '-' });
        f.write_str(&perms)
    }
}
