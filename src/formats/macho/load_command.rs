//! Load command nodes and their iterator.

use crate::core::address::{self, VmSize};
use crate::core::context::Context;
use crate::core::types::{require_live, BackedNode, Node, TypeRecord, TYPE_CLASS};
use crate::diagnostic;
use crate::error::{MachError, Result};
use crate::formats::macho::types::{
    WordSize, LC_REQ_DYLD, LC_SEGMENT, LC_SEGMENT_64, LOAD_COMMAND_SIZE,
};
use crate::formats::macho::MachImage;

pub static LOAD_COMMAND_CLASS: TypeRecord = TypeRecord {
    parent: Some(&TYPE_CLASS),
    name: "load_command",
};

/// One load command of an image, located by its offset from the header.
#[derive(Debug, Clone)]
pub struct LoadCommand<'a> {
    record: Option<&'static TypeRecord>,
    macho: &'a MachImage,
    offset: VmSize,
    cmd: u32,
    cmdsize: u32,
}

impl<'a> LoadCommand<'a> {
    /// Decode the command `offset` bytes after the image's header.
    ///
    /// The command must start after the header and end within `sizeofcmds`.
    pub fn parse(macho: &'a MachImage, offset: VmSize) -> Result<Self> {
        require_live(macho)?;
        let context = macho.context();
        let mapped = macho
            .mapped_object()
            .ok_or_else(|| MachError::invalid("image has been freed"))?;
        let commands_end = macho.load_commands_end();

        if offset < macho.header().size()
            || address::add(offset, LOAD_COMMAND_SIZE)? > commands_end
        {
            diagnostic!(
                context,
                "Load command at offset {:#x} lies outside the load command area (ends at {:#x})",
                offset,
                commands_end
            );
            return Err(MachError::malformed(offset, "load command outside sizeofcmds"));
        }

        let order = macho.byte_order();
        let cmd = mapped.read_u32(offset, order)?;
        let cmdsize = mapped.read_u32(offset + 4, order)?;

        if u64::from(cmdsize) < LOAD_COMMAND_SIZE {
            diagnostic!(
                context,
                "Load command {:#x} at offset {:#x} has cmdsize {}",
                cmd,
                offset,
                cmdsize
            );
            return Err(MachError::malformed(
                offset + 4,
                format!("cmdsize {} is too small", cmdsize),
            ));
        }
        if address::add(offset, u64::from(cmdsize))? > commands_end {
            diagnostic!(
                context,
                "Load command {:#x} at offset {:#x} (cmdsize {}) extends past sizeofcmds",
                cmd,
                offset,
                cmdsize
            );
            return Err(MachError::malformed(offset + 4, "load command extends past sizeofcmds"));
        }

        Ok(Self {
            record: Some(&LOAD_COMMAND_CLASS),
            macho,
            offset,
            cmd,
            cmdsize,
        })
    }

    /// The `cmd` field.
    pub fn id(&self) -> u32 {
        self.cmd
    }

    /// The `cmdsize` field.
    pub fn size(&self) -> u32 {
        self.cmdsize
    }

    /// Offset of the command from the image header.
    pub fn offset(&self) -> VmSize {
        self.offset
    }

    pub fn requires_dyld(&self) -> bool {
        self.cmd & LC_REQ_DYLD != 0
    }

    pub fn is_segment(&self) -> bool {
        self.segment_word_size().is_some()
    }

    /// The width of the segment record this command carries, if it is one.
    pub fn segment_word_size(&self) -> Option<WordSize> {
        match self.cmd {
            LC_SEGMENT => Some(WordSize::Bits32),
            LC_SEGMENT_64 => Some(WordSize::Bits64),
            _ => None,
        }
    }

    /// The whole command, `cmdsize` bytes.
    pub fn raw_bytes(&self) -> Result<&'a [u8]> {
        require_live(self)?;
        self.macho
            .mapped_object()
            .ok_or_else(|| MachError::invalid("image has been freed"))?
            .read_at(self.offset, u64::from(self.cmdsize))
    }

    pub fn macho(&self) -> &'a MachImage {
        self.macho
    }

    /// Mark the command freed. It owns no window of its own.
    pub fn free(&mut self) {
        self.record = None;
    }
}

impl Node for LoadCommand<'_> {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        self.macho.context()
    }
}

/// Iterator over an image's load commands.
pub struct LoadCommands<'a> {
    macho: &'a MachImage,
    remaining: u32,
    offset: VmSize,
    failed: bool,
}

impl<'a> LoadCommands<'a> {
    pub(crate) fn new(macho: &'a MachImage) -> Self {
        Self {
            macho,
            remaining: macho.header().ncmds,
            offset: macho.header().size(),
            failed: false,
        }
    }
}

impl<'a> Iterator for LoadCommands<'a> {
    type Item = Result<LoadCommand<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let command = LoadCommand::parse(self.macho, self.offset)
            .and_then(|command| {
                self.offset = address::add(self.offset, u64::from(command.size()))?;
                Ok(command)
            });
        match command {
            Ok(command) => {
                self.remaining -= 1;
                Some(Ok(command))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.remaining as usize))
        }
    }
}
