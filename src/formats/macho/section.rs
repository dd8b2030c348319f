//! Sections of a segment.

use std::borrow::Cow;

use crate::core::address::{self, VmAddress, VmSize};
use crate::core::address_range::VmRange;
use crate::core::context::Context;
use crate::core::types::{require_live, BackedNode, Node, TypeRecord, TYPE_CLASS};
use crate::diagnostic;
use crate::error::{MachError, Result};
use crate::formats::macho::segment::Segment;
use crate::formats::macho::types::{
    SectionAttributes, SectionType, WordSize, SECTION_ATTRIBUTES, SECTION_TYPE,
};
use crate::formats::macho::utils::{self, ByteOrder, EndianRead, NAME_SIZE};
use crate::formats::macho::{release_object, MachImage};
use crate::io::{Addressing, MappedObject};

pub static SECTION_CLASS: TypeRecord = TypeRecord {
    parent: Some(&TYPE_CLASS),
    name: "section",
};

/// `section`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section32 {
    pub sectname: [u8; NAME_SIZE],
    pub segname: [u8; NAME_SIZE],
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

/// `section_64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section64 {
    pub sectname: [u8; NAME_SIZE],
    pub segname: [u8; NAME_SIZE],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

/// A section record of either width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRecord {
    Section32(Section32),
    Section64(Section64),
}

impl SectionRecord {
    /// Decode a section record from the start of `data`.
    pub fn parse(data: &[u8], word_size: WordSize, order: ByteOrder) -> Result<Self> {
        Ok(match word_size {
            WordSize::Bits32 => SectionRecord::Section32(Section32 {
                sectname: data.read_name(0)?,
                segname: data.read_name(16)?,
                addr: data.read_u32(32, order)?,
                size: data.read_u32(36, order)?,
                offset: data.read_u32(40, order)?,
                align: data.read_u32(44, order)?,
                reloff: data.read_u32(48, order)?,
                nreloc: data.read_u32(52, order)?,
                flags: data.read_u32(56, order)?,
                reserved1: data.read_u32(60, order)?,
                reserved2: data.read_u32(64, order)?,
            }),
            WordSize::Bits64 => SectionRecord::Section64(Section64 {
                sectname: data.read_name(0)?,
                segname: data.read_name(16)?,
                addr: data.read_u64(32, order)?,
                size: data.read_u64(40, order)?,
                offset: data.read_u32(48, order)?,
                align: data.read_u32(52, order)?,
                reloff: data.read_u32(56, order)?,
                nreloc: data.read_u32(60, order)?,
                flags: data.read_u32(64, order)?,
                reserved1: data.read_u32(68, order)?,
                reserved2: data.read_u32(72, order)?,
                reserved3: data.read_u32(76, order)?,
            }),
        })
    }

    pub fn word_size(&self) -> WordSize {
        match self {
            SectionRecord::Section32(_) => WordSize::Bits32,
            SectionRecord::Section64(_) => WordSize::Bits64,
        }
    }

    pub fn section_name_raw(&self) -> &[u8; NAME_SIZE] {
        match self {
            SectionRecord::Section32(s) => &s.sectname,
            SectionRecord::Section64(s) => &s.sectname,
        }
    }

    pub fn segment_name_raw(&self) -> &[u8; NAME_SIZE] {
        match self {
            SectionRecord::Section32(s) => &s.segname,
            SectionRecord::Section64(s) => &s.segname,
        }
    }

    pub fn section_name(&self) -> Cow<'_, str> {
        utils::name_str(self.section_name_raw())
    }

    pub fn segment_name(&self) -> Cow<'_, str> {
        utils::name_str(self.segment_name_raw())
    }

    pub fn addr(&self) -> VmAddress {
        match self {
            SectionRecord::Section32(s) => u64::from(s.addr),
            SectionRecord::Section64(s) => s.addr,
        }
    }

    pub fn size(&self) -> VmSize {
        match self {
            SectionRecord::Section32(s) => u64::from(s.size),
            SectionRecord::Section64(s) => s.size,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.offset,
            SectionRecord::Section64(s) => s.offset,
        }
    }

    pub fn align(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.align,
            SectionRecord::Section64(s) => s.align,
        }
    }

    pub fn reloff(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.reloff,
            SectionRecord::Section64(s) => s.reloff,
        }
    }

    pub fn nreloc(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.nreloc,
            SectionRecord::Section64(s) => s.nreloc,
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.flags,
            SectionRecord::Section64(s) => s.flags,
        }
    }

    pub fn reserved1(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.reserved1,
            SectionRecord::Section64(s) => s.reserved1,
        }
    }

    pub fn reserved2(&self) -> u32 {
        match self {
            SectionRecord::Section32(s) => s.reserved2,
            SectionRecord::Section64(s) => s.reserved2,
        }
    }

    pub fn section_type(&self) -> SectionType {
        SectionType::from((self.flags() & SECTION_TYPE) as u8)
    }

    pub fn attributes(&self) -> SectionAttributes {
        SectionAttributes::from_bits_retain(self.flags() & SECTION_ATTRIBUTES)
    }
}

/// A section node, validated against its segment.
pub struct Section<'a> {
    record: Option<&'static TypeRecord>,
    segment: &'a Segment<'a>,
    section: SectionRecord,
    vm_range: VmRange,
    mapped: Option<MappedObject>,
}

impl<'a> Section<'a> {
    /// Validate `section` against `segment` and map its bytes.
    ///
    /// The slid VM range must lie within the segment's VM range. In a file
    /// map the section's file bytes must also lie within the segment's file
    /// bytes; zero-fill sections have none and map an empty window.
    /// Zero-size sections are accepted as long as their address lies within
    /// the segment, where a strict check would refuse them.
    pub fn new(segment: &'a Segment<'a>, section: SectionRecord) -> Result<Self> {
        require_live(segment)?;
        let macho = segment.macho();
        let context = segment.context();

        if section.word_size() != segment.word_size() {
            return Err(MachError::invalid(format!(
                "{}-bit section record in a {}-bit segment",
                section.word_size().bits(),
                segment.word_size().bits()
            )));
        }

        let name = section.section_name().into_owned();
        let vm_address = address::apply_offset(section.addr(), macho.slide()).map_err(|e| {
            diagnostic!(
                context,
                "Arithmetic error {} while applying slide ({}) to vm_address ({:#x}) of section {}",
                e,
                macho.slide(),
                section.addr(),
                name
            );
            e
        })?;
        let vm_range = VmRange::new(vm_address, section.size());

        segment.vm_range().check_contains(&vm_range, true).map_err(|e| {
            diagnostic!(
                context,
                "Section {} {} is not within segment {} {}",
                name,
                vm_range,
                segment.name(),
                segment.vm_range()
            );
            e
        })?;

        let map_range = match macho.addressing() {
            Addressing::VmAddresses => vm_range,
            Addressing::FileOffsets => {
                let segment_file = segment
                    .file_range()
                    .ok_or_else(|| MachError::invalid("segment has no file range in a file map"))?;
                if section.section_type().is_zerofill() {
                    VmRange::new(segment_file.end()?, 0)
                } else {
                    let file_range = macho
                        .node_range()?
                        .offset_range(i64::from(section.offset()), section.size())
                        .map_err(|e| {
                            diagnostic!(
                                context,
                                "Arithmetic error {} while locating file bytes of section {} \
                                 (offset {:#x})",
                                e,
                                name,
                                section.offset()
                            );
                            e
                        })?;
                    segment_file.check_contains(&file_range, true).map_err(|e| {
                        diagnostic!(
                            context,
                            "Section {} file range {} is not within segment {} file range {}",
                            name,
                            file_range,
                            segment.name(),
                            segment_file
                        );
                        e
                    })?;
                    file_range
                }
            }
        };

        let mapped = macho
            .memory_map()
            .init_object(0, map_range.address, map_range.size, true)
            .map_err(|e| {
                diagnostic!(
                    context,
                    "Failed to init memory object for section {} at {}: {}",
                    name,
                    map_range,
                    e
                );
                e
            })?;

        Ok(Self {
            record: Some(&SECTION_CLASS),
            segment,
            section,
            vm_range,
            mapped: Some(mapped),
        })
    }

    pub fn record(&self) -> &SectionRecord {
        &self.section
    }

    pub fn segment(&self) -> &'a Segment<'a> {
        self.segment
    }

    pub fn word_size(&self) -> WordSize {
        self.section.word_size()
    }

    pub fn is_64bit(&self) -> bool {
        self.word_size() == WordSize::Bits64
    }

    pub fn name(&self) -> Cow<'_, str> {
        self.section.section_name()
    }

    pub fn copy_name(&self, output: &mut [u8; NAME_SIZE]) -> usize {
        utils::copy_name(self.section.section_name_raw(), output)
    }

    /// The `segname` field as declared in the record.
    pub fn segment_name(&self) -> Cow<'_, str> {
        self.section.segment_name()
    }

    pub fn copy_segment_name(&self, output: &mut [u8; NAME_SIZE]) -> usize {
        utils::copy_name(self.section.segment_name_raw(), output)
    }

    /// Declared (unslid) `addr`.
    pub fn vm_address(&self) -> VmAddress {
        self.section.addr()
    }

    pub fn vm_size(&self) -> VmSize {
        self.section.size()
    }

    /// The slid VM range, validated to lie within the segment.
    pub fn vm_range(&self) -> VmRange {
        self.vm_range
    }

    pub fn file_offset(&self) -> u32 {
        self.section.offset()
    }

    /// Power-of-two alignment exponent.
    pub fn alignment(&self) -> u32 {
        self.section.align()
    }

    pub fn relocations_offset(&self) -> u32 {
        self.section.reloff()
    }

    pub fn number_of_relocations(&self) -> u32 {
        self.section.nreloc()
    }

    pub fn flags(&self) -> u32 {
        self.section.flags()
    }

    pub fn section_type(&self) -> SectionType {
        self.section.section_type()
    }

    pub fn attributes(&self) -> SectionAttributes {
        self.section.attributes()
    }

    pub fn reserved1(&self) -> u32 {
        self.section.reserved1()
    }

    pub fn reserved2(&self) -> u32 {
        self.section.reserved2()
    }

    /// The section's mapped bytes; empty for zero-fill sections in a file map
    /// and after free.
    pub fn data(&self) -> &[u8] {
        self.mapped.as_ref().map_or(&[][..], MappedObject::as_bytes)
    }

    /// Release the section's window. Safe to call more than once.
    pub fn free(&mut self) {
        if self.record.take().is_none() {
            return;
        }
        release_object(self.segment.macho(), &mut self.mapped, "section");
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        self.free();
    }
}

impl Node for Section<'_> {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        self.segment.context()
    }
}

impl BackedNode for Section<'_> {
    fn macho(&self) -> &MachImage {
        self.segment.macho()
    }

    fn mapped_object(&self) -> Option<&MappedObject> {
        self.mapped.as_ref()
    }
}

impl std::fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("name", &self.name())
            .field("segment", &self.segment_name())
            .field("vm_range", &self.vm_range)
            .field("type", &self.section_type())
            .finish()
    }
}
