//! Segment load commands.

use std::borrow::Cow;

use crate::core::address::{self, VmAddress, VmSize};
use crate::core::address_range::VmRange;
use crate::core::context::Context;
use crate::core::types::{require_live, BackedNode, Node, TypeRecord, TYPE_CLASS};
use crate::diagnostic;
use crate::error::{MachError, Result};
use crate::formats::macho::load_command::LoadCommand;
use crate::formats::macho::section::{Section, SectionRecord};
use crate::formats::macho::types::{VmProt, WordSize};
use crate::formats::macho::utils::{self, ByteOrder, EndianRead, NAME_SIZE};
use crate::formats::macho::{release_object, MachImage};
use crate::io::{Addressing, MappedObject};

pub static SEGMENT_CLASS: TypeRecord = TypeRecord {
    parent: Some(&TYPE_CLASS),
    name: "segment",
};

/// `segment_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCommand32 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; NAME_SIZE],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

/// `segment_command_64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; NAME_SIZE],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

/// A segment record of either width. Accessors widen 32-bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentCommand {
    Segment32(SegmentCommand32),
    Segment64(SegmentCommand64),
}

impl SegmentCommand {
    /// Decode a segment record from the start of `data`.
    pub fn parse(data: &[u8], word_size: WordSize, order: ByteOrder) -> Result<Self> {
        Ok(match word_size {
            WordSize::Bits32 => SegmentCommand::Segment32(SegmentCommand32 {
                cmd: data.read_u32(0, order)?,
                cmdsize: data.read_u32(4, order)?,
                segname: data.read_name(8)?,
                vmaddr: data.read_u32(24, order)?,
                vmsize: data.read_u32(28, order)?,
                fileoff: data.read_u32(32, order)?,
                filesize: data.read_u32(36, order)?,
                maxprot: data.read_i32(40, order)?,
                initprot: data.read_i32(44, order)?,
                nsects: data.read_u32(48, order)?,
                flags: data.read_u32(52, order)?,
            }),
            WordSize::Bits64 => SegmentCommand::Segment64(SegmentCommand64 {
                cmd: data.read_u32(0, order)?,
                cmdsize: data.read_u32(4, order)?,
                segname: data.read_name(8)?,
                vmaddr: data.read_u64(24, order)?,
                vmsize: data.read_u64(32, order)?,
                fileoff: data.read_u64(40, order)?,
                filesize: data.read_u64(48, order)?,
                maxprot: data.read_i32(56, order)?,
                initprot: data.read_i32(60, order)?,
                nsects: data.read_u32(64, order)?,
                flags: data.read_u32(68, order)?,
            }),
        })
    }

    /// Decode the record carried by a segment load command.
    pub fn parse_from(command: &LoadCommand<'_>) -> Result<Self> {
        let word_size = command.segment_word_size().ok_or_else(|| {
            MachError::invalid(format!("load command {:#x} is not a segment", command.id()))
        })?;
        Self::parse(command.raw_bytes()?, word_size, command.macho().byte_order())
            .map_err(|e| e.at_record(command.offset()))
    }

    pub fn word_size(&self) -> WordSize {
        match self {
            SegmentCommand::Segment32(_) => WordSize::Bits32,
            SegmentCommand::Segment64(_) => WordSize::Bits64,
        }
    }

    pub fn cmdsize(&self) -> u32 {
        match self {
            SegmentCommand::Segment32(s) => s.cmdsize,
            SegmentCommand::Segment64(s) => s.cmdsize,
        }
    }

    pub fn name_raw(&self) -> &[u8; NAME_SIZE] {
        match self {
            SegmentCommand::Segment32(s) => &s.segname,
            SegmentCommand::Segment64(s) => &s.segname,
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        utils::name_str(self.name_raw())
    }

    pub fn vmaddr(&self) -> VmAddress {
        match self {
            SegmentCommand::Segment32(s) => u64::from(s.vmaddr),
            SegmentCommand::Segment64(s) => s.vmaddr,
        }
    }

    pub fn vmsize(&self) -> VmSize {
        match self {
            SegmentCommand::Segment32(s) => u64::from(s.vmsize),
            SegmentCommand::Segment64(s) => s.vmsize,
        }
    }

    pub fn fileoff(&self) -> u64 {
        match self {
            SegmentCommand::Segment32(s) => u64::from(s.fileoff),
            SegmentCommand::Segment64(s) => s.fileoff,
        }
    }

    pub fn filesize(&self) -> u64 {
        match self {
            SegmentCommand::Segment32(s) => u64::from(s.filesize),
            SegmentCommand::Segment64(s) => s.filesize,
        }
    }

    pub fn maxprot(&self) -> VmProt {
        match self {
            SegmentCommand::Segment32(s) => VmProt::from_bits_retain(s.maxprot),
            SegmentCommand::Segment64(s) => VmProt::from_bits_retain(s.maxprot),
        }
    }

    pub fn initprot(&self) -> VmProt {
        match self {
            SegmentCommand::Segment32(s) => VmProt::from_bits_retain(s.initprot),
            SegmentCommand::Segment64(s) => VmProt::from_bits_retain(s.initprot),
        }
    }

    pub fn nsects(&self) -> u32 {
        match self {
            SegmentCommand::Segment32(s) => s.nsects,
            SegmentCommand::Segment64(s) => s.nsects,
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            SegmentCommand::Segment32(s) => s.flags,
            SegmentCommand::Segment64(s) => s.flags,
        }
    }
}

/// A segment node: a validated segment record and its mapped window.
///
/// In a file map the window covers the segment's file bytes; in a process map
/// it covers the slid VM range.
pub struct Segment<'a> {
    record: Option<&'static TypeRecord>,
    load_command: LoadCommand<'a>,
    command: SegmentCommand,
    vm_range: VmRange,
    file_range: Option<VmRange>,
    mapped: Option<MappedObject>,
}

impl<'a> Segment<'a> {
    pub fn new(load_command: LoadCommand<'a>) -> Result<Self> {
        require_live(&load_command)?;
        let macho = load_command.macho();
        let context = macho.context();

        let command = SegmentCommand::parse_from(&load_command).map_err(|e| {
            diagnostic!(
                context,
                "Failed to decode segment load command at offset {:#x}: {}",
                load_command.offset(),
                e
            );
            e
        })?;
        let name = command.name().into_owned();
        let word_size = command.word_size();

        // nsects is a u32 and a section record is at most 80 bytes
        let needed = address::add(
            word_size.segment_command_size(),
            u64::from(command.nsects()) * word_size.section_size(),
        )?;
        if needed > u64::from(command.cmdsize()) {
            diagnostic!(
                context,
                "Segment {} declares {} sections but its load command holds only {} bytes",
                name,
                command.nsects(),
                command.cmdsize()
            );
            return Err(MachError::malformed(
                load_command.offset() + 4,
                format!("{} sections do not fit in cmdsize", command.nsects()),
            ));
        }

        let vm_address = address::apply_offset(command.vmaddr(), macho.slide()).map_err(|e| {
            diagnostic!(
                context,
                "Arithmetic error {} while applying slide ({}) to vm_address ({:#x}) of segment {}",
                e,
                macho.slide(),
                command.vmaddr(),
                name
            );
            e
        })?;
        let vm_range = VmRange::new(vm_address, command.vmsize());
        vm_range.end().map_err(|e| {
            diagnostic!(context, "Segment {} VM range {} overflows: {}", name, vm_range, e);
            e
        })?;

        let image_range = macho.node_range()?;
        let (map_range, file_range) = match macho.addressing() {
            Addressing::FileOffsets => {
                let file_range = address::size_to_offset(command.fileoff())
                    .and_then(|offset| image_range.offset_range(offset, command.filesize()))
                    .map_err(|e| {
                        diagnostic!(
                            context,
                            "Arithmetic error {} while locating file range of segment {} \
                             (fileoff {:#x}, filesize {:#x})",
                            e,
                            name,
                            command.fileoff(),
                            command.filesize()
                        );
                        e
                    })?;
                image_range.check_contains(&file_range, true).map_err(|e| {
                    diagnostic!(
                        context,
                        "Segment {} file range {} is not within image {}",
                        name,
                        file_range,
                        image_range
                    );
                    e
                })?;
                (file_range, Some(file_range))
            }
            // nothing is mapped for a segment without protections (__PAGEZERO)
            Addressing::VmAddresses if command.initprot().is_empty() => {
                (VmRange::new(vm_range.address, 0), None)
            }
            Addressing::VmAddresses => (vm_range, None),
        };

        let mapped = macho
            .memory_map()
            .init_object(0, map_range.address, map_range.size, true)
            .map_err(|e| {
                diagnostic!(
                    context,
                    "Failed to init memory object for segment {} at {}: {}",
                    name,
                    map_range,
                    e
                );
                e
            })?;

        Ok(Self {
            record: Some(&SEGMENT_CLASS),
            load_command,
            command,
            vm_range,
            file_range,
            mapped: Some(mapped),
        })
    }

    pub fn command(&self) -> &SegmentCommand {
        &self.command
    }

    pub fn load_command(&self) -> &LoadCommand<'a> {
        &self.load_command
    }

    pub fn name(&self) -> Cow<'_, str> {
        self.command.name()
    }

    /// Copy the segment name into `output`. Returns the name length.
    pub fn copy_name(&self, output: &mut [u8; NAME_SIZE]) -> usize {
        utils::copy_name(self.command.name_raw(), output)
    }

    pub fn word_size(&self) -> WordSize {
        self.command.word_size()
    }

    pub fn is_64bit(&self) -> bool {
        self.word_size() == WordSize::Bits64
    }

    /// Declared (unslid) `vmaddr`.
    pub fn vm_address(&self) -> VmAddress {
        self.command.vmaddr()
    }

    pub fn vm_size(&self) -> VmSize {
        self.command.vmsize()
    }

    pub fn file_offset(&self) -> u64 {
        self.command.fileoff()
    }

    pub fn file_size(&self) -> u64 {
        self.command.filesize()
    }

    pub fn max_protection(&self) -> VmProt {
        self.command.maxprot()
    }

    pub fn initial_protection(&self) -> VmProt {
        self.command.initprot()
    }

    pub fn number_of_sections(&self) -> u32 {
        self.command.nsects()
    }

    pub fn flags(&self) -> u32 {
        self.command.flags()
    }

    /// The slid VM range, validated against overflow.
    pub fn vm_range(&self) -> VmRange {
        self.vm_range
    }

    /// The segment's bytes in a file map, relative to the map.
    pub fn file_range(&self) -> Option<VmRange> {
        self.file_range
    }

    /// Decode section record `index` without initializing a node for it.
    pub fn section_record(&self, index: u32) -> Result<SectionRecord> {
        require_live(self)?;
        let count = self.command.nsects();
        if index >= count {
            return Err(MachError::invalid(format!(
                "section index {} out of range for segment {} ({} sections)",
                index,
                self.name(),
                count
            )));
        }

        let word_size = self.word_size();
        let start = word_size.segment_command_size() + u64::from(index) * word_size.section_size();
        let raw = self.load_command.raw_bytes()?;
        let record_bytes = raw
            .get(address::to_usize(start)?..)
            .ok_or(MachError::Truncated {
                offset: start,
                needed: word_size.section_size(),
            })
            .map_err(|e| e.at_record(self.load_command.offset()))?;
        SectionRecord::parse(record_bytes, word_size, self.load_command.macho().byte_order())
            .map_err(|e| e.at_record(self.load_command.offset() + start))
    }

    /// Initialize section `index` of this segment.
    pub fn section(&self, index: u32) -> Result<Section<'_>> {
        Section::new(self, self.section_record(index)?)
    }

    /// Every section in declaration order.
    pub fn sections(&self) -> impl Iterator<Item = Result<Section<'_>>> + '_ {
        (0..self.command.nsects()).map(move |index| self.section(index))
    }

    /// The first section named `name`, if any.
    pub fn section_named(&self, name: &str) -> Result<Option<Section<'_>>> {
        for index in 0..self.command.nsects() {
            let record = self.section_record(index)?;
            if record.section_name() == name {
                return Section::new(self, record).map(Some);
            }
        }
        Ok(None)
    }

    /// Release the segment's window. Safe to call more than once.
    pub fn free(&mut self) {
        if self.record.take().is_none() {
            return;
        }
        release_object(self.load_command.macho(), &mut self.mapped, "segment");
        self.load_command.free();
    }
}

impl Drop for Segment<'_> {
    fn drop(&mut self) {
        self.free();
    }
}

impl Node for Segment<'_> {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        self.load_command.macho().context()
    }
}

impl BackedNode for Segment<'_> {
    fn macho(&self) -> &MachImage {
        self.load_command.macho()
    }

    fn mapped_object(&self) -> Option<&MappedObject> {
        self.mapped.as_ref()
    }
}

impl std::fmt::Debug for Segment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name())
            .field("vm_range", &self.vm_range)
            .field("file_range", &self.file_range)
            .field("initprot", &self.initial_protection().to_string())
            .field("nsects", &self.number_of_sections())
            .finish()
    }
}
