//! Mach-O image nodes.
//!
//! A [`MachImage`] owns the memory map and context of one thin image. Every
//! other node ([`LoadCommand`], [`Segment`], [`Section`], [`OffsetNode`],
//! [`CStringNode`]) borrows its parent, so the borrow checker keeps children
//! from outliving the image they descend from.

use std::path::Path;

pub mod cstring;
pub mod load_command;
pub mod offset_node;
pub mod section;
pub mod segment;
pub mod types;
pub mod utils;

pub use cstring::{CStringNode, CSTRING_CLASS};
pub use load_command::{LoadCommand, LoadCommands, LOAD_COMMAND_CLASS};
pub use offset_node::{OffsetNode, OFFSET_NODE_CLASS};
pub use section::{Section, Section32, Section64, SectionRecord, SECTION_CLASS};
pub use segment::{Segment, SegmentCommand, SegmentCommand32, SegmentCommand64, SEGMENT_CLASS};
pub use types::*;
pub use utils::ByteOrder;

use crate::config::ParseConfig;
use crate::core::address::{self, VmAddress, VmOffset, VmSize};
use crate::core::address_range::VmRange;
use crate::core::context::{Context, ContextFlags};
use crate::core::types::{BackedNode, Node, TypeRecord, TYPE_CLASS};
use crate::error::{MachError, Result};
use crate::io::process::{ProcessMemoryMap, TaskMemory};
use crate::io::{Addressing, FileMemoryMap, MappedObject, MemoryMap};
use crate::{diagnostic, span_trace};
use bytes::Bytes;
use tracing::debug;

pub static MACHO_CLASS: TypeRecord = TypeRecord {
    parent: Some(&TYPE_CLASS),
    name: "macho",
};

/// Options for opening an image.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Name used in diagnostics.
    pub name: String,
    /// Difference between the loaded and the declared addresses.
    pub slide: VmOffset,
    pub flags: ContextFlags,
    pub config: ParseConfig,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            name: "image".to_string(),
            slide: 0,
            flags: ContextFlags::empty(),
            config: ParseConfig::default(),
        }
    }
}

impl ImageOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_slide(mut self, slide: VmOffset) -> Self {
        self.slide = slide;
        self
    }

    pub fn with_flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_config(mut self, config: ParseConfig) -> Self {
        self.config = config;
        self
    }
}

/// The root node: one thin Mach-O image in a memory map.
pub struct MachImage {
    record: Option<&'static TypeRecord>,
    context: Context,
    memory_map: Box<dyn MemoryMap>,
    config: ParseConfig,
    header: MachHeader,
    slide: VmOffset,
    mapped: Option<MappedObject>,
}

impl MachImage {
    /// Open the image whose header sits at `header_address` in `memory_map`.
    ///
    /// In a file map the image covers everything from the header to the end of
    /// the file; in a process map it covers the header and load commands.
    pub fn open(
        memory_map: Box<dyn MemoryMap>,
        header_address: VmAddress,
        options: ImageOptions,
    ) -> Result<Self> {
        let span = span_trace!("macho_open", image = %options.name, header_address);
        let _guard = span.enter();

        let context = Context::new(options.name, options.flags);
        let config = options.config;

        let header = read_header(memory_map.as_ref(), header_address).map_err(|e| {
            diagnostic!(context, "Failed to read Mach header at {:#x}: {}", header_address, e);
            e
        })?;

        if header.ncmds > config.max_load_commands {
            diagnostic!(
                context,
                "Image declares {} load commands, more than the limit of {}",
                header.ncmds,
                config.max_load_commands
            );
            return Err(MachError::malformed(
                16,
                format!("{} load commands exceed the limit", header.ncmds),
            ));
        }

        let commands_end = address::add(header.size(), u64::from(header.sizeofcmds))?;
        let range = match memory_map.extent() {
            Some(extent) => {
                let size = address::distance(header_address, extent.end()?)?;
                if commands_end > size {
                    diagnostic!(
                        context,
                        "Load commands ({} bytes) extend past the end of the image ({} bytes)",
                        header.sizeofcmds,
                        size
                    );
                    return Err(MachError::malformed(
                        20,
                        "sizeofcmds extends past the end of the image",
                    ));
                }
                VmRange::new(header_address, size)
            }
            None => VmRange::new(header_address, commands_end),
        };

        let mapped = memory_map
            .init_object(0, range.address, range.size, false)
            .map_err(|e| {
                diagnostic!(context, "Failed to init memory object for image {}: {}", range, e);
                e
            })?;

        debug!(
            image = context.name(),
            word_size = header.word_size.bits(),
            ncmds = header.ncmds,
            range = %range,
            "Opened Mach-O image"
        );

        Ok(Self {
            record: Some(&MACHO_CLASS),
            context,
            memory_map,
            config,
            header,
            slide: options.slide,
            mapped: Some(mapped),
        })
    }

    /// Memory-map `path` and open the image at its start.
    pub fn from_file<P: AsRef<Path>>(path: P, options: ImageOptions) -> Result<Self> {
        let map = FileMemoryMap::open(path, options.config.io.clone())?;
        Self::open(Box::new(map), 0, options)
    }

    /// Open an image held in memory.
    pub fn from_bytes(data: impl Into<Bytes>, options: ImageOptions) -> Result<Self> {
        let map = FileMemoryMap::from_bytes(options.name.clone(), data, options.config.io.clone())?;
        Self::open(Box::new(map), 0, options)
    }

    /// Open the image loaded at `header_address` in a task.
    pub fn from_task<T: TaskMemory + 'static>(
        task: T,
        header_address: VmAddress,
        options: ImageOptions,
    ) -> Result<Self> {
        let map = ProcessMemoryMap::new(task, options.config.io.clone());
        Self::open(Box::new(map), header_address, options)
    }

    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    pub fn word_size(&self) -> WordSize {
        self.header.word_size
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn is_64bit(&self) -> bool {
        self.header.word_size == WordSize::Bits64
    }

    pub fn slide(&self) -> VmOffset {
        self.slide
    }

    pub fn config(&self) -> &ParseConfig {
        &self.config
    }

    pub fn memory_map(&self) -> &dyn MemoryMap {
        self.memory_map.as_ref()
    }

    pub fn addressing(&self) -> Addressing {
        self.memory_map.addressing()
    }

    /// Address of the header in the memory map's address space.
    pub fn header_address(&self) -> Result<VmAddress> {
        Ok(self.node_range()?.address)
    }

    /// Byte offset, relative to the header, one past the last load command.
    pub fn load_commands_end(&self) -> VmSize {
        self.header.size() + u64::from(self.header.sizeofcmds)
    }

    /// The load commands in declaration order. Iteration stops after the
    /// first malformed command.
    pub fn load_commands(&self) -> LoadCommands<'_> {
        LoadCommands::new(self)
    }

    /// Every segment load command, initialized as a [`Segment`].
    pub fn segments(&self) -> impl Iterator<Item = Result<Segment<'_>>> + '_ {
        self.load_commands().filter_map(|command| match command {
            Ok(command) if command.is_segment() => Some(Segment::new(command)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }

    /// The first segment named `name`, if any.
    ///
    /// Only the matching segment is initialized; other segments are decoded
    /// just far enough to read their names.
    pub fn segment_named(&self, name: &str) -> Result<Option<Segment<'_>>> {
        for command in self.load_commands() {
            let command = command?;
            if !command.is_segment() {
                continue;
            }
            if SegmentCommand::parse_from(&command)?.name() == name {
                return Segment::new(command).map(Some);
            }
        }
        Ok(None)
    }

    /// Release the image's window. Safe to call more than once; any node
    /// still borrowing the image prevents this call at compile time.
    pub fn free(&mut self) {
        if self.record.take().is_none() {
            return;
        }
        if let Some(object) = self.mapped.take() {
            let range = object.range();
            if let Err(e) = self.memory_map.free_object(object) {
                self.context
                    .warning(format!("Failed to release image window {}: {}", range, e));
            }
        }
    }
}

impl Drop for MachImage {
    fn drop(&mut self) {
        self.free();
    }
}

impl Node for MachImage {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        &self.context
    }
}

impl BackedNode for MachImage {
    fn macho(&self) -> &MachImage {
        self
    }

    fn mapped_object(&self) -> Option<&MappedObject> {
        self.mapped.as_ref()
    }
}

impl std::fmt::Debug for MachImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachImage")
            .field("name", &self.context.name())
            .field("header", &self.header)
            .field("slide", &self.slide)
            .field("mapped", &self.mapped)
            .finish()
    }
}

fn read_header(memory_map: &dyn MemoryMap, header_address: VmAddress) -> Result<MachHeader> {
    let magic = memory_map.init_object(0, header_address, 4, false)?;
    let raw: [u8; 4] = magic
        .as_bytes()
        .try_into()
        .map_err(|_| MachError::Truncated { offset: 0, needed: 4 })?;
    let (word_size, _) = identify_magic(raw)?;
    memory_map.free_object(magic)?;

    let window = memory_map.init_object(0, header_address, word_size.header_size(), false)?;
    let header = MachHeader::parse(window.as_bytes());
    memory_map.free_object(window)?;
    header
}

/// Hand a child node's window back to the image's memory map. Failures are
/// reported on the image's context and otherwise ignored.
pub(crate) fn release_object(macho: &MachImage, slot: &mut Option<MappedObject>, kind: &str) {
    if let Some(object) = slot.take() {
        let range = object.range();
        if let Err(e) = macho.memory_map().free_object(object) {
            macho
                .context()
                .warning(format!("Failed to release {} window {}: {}", kind, range, e));
        }
    }
}
