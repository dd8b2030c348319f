//! NUL-terminated strings inside another node.

use crate::core::address::{self, VmOffset, VmSize};
use crate::core::address_range::VmRange;
use crate::core::context::Context;
use crate::core::types::{require_live, type_name, BackedNode, Node, TypeRecord};
use crate::diagnostic;
use crate::error::{MachError, Result};
use crate::formats::macho::offset_node::{map_child, resolve_child, OFFSET_NODE_CLASS};
use crate::formats::macho::{release_object, MachImage};
use crate::io::MappedObject;

/// A C-string is an offset node whose size is discovered by scanning.
pub static CSTRING_CLASS: TypeRecord = TypeRecord {
    parent: Some(&OFFSET_NODE_CLASS),
    name: "cstring",
};

/// A NUL-terminated string starting `offset` bytes into a parent node.
///
/// The node's size includes the terminator. Text is decoded lossily, so
/// invalid UTF-8 never fails initialization.
pub struct CStringNode<'a> {
    record: Option<&'static TypeRecord>,
    parent: &'a dyn BackedNode,
    offset: VmOffset,
    string: String,
    mapped: Option<MappedObject>,
}

impl<'a> CStringNode<'a> {
    pub fn new(parent: &'a dyn BackedNode, offset: VmOffset) -> Result<Self> {
        require_live(parent)?;
        let context = parent.context();
        let parent_range = parent.node_range()?;
        let parent_bytes = parent
            .mapped_object()
            .ok_or_else(|| MachError::invalid("parent node has been freed"))?;

        let start = address::apply_offset(parent_range.address, offset).map_err(|e| {
            diagnostic!(
                context,
                "Arithmetic error {} while applying offset ({}) to {} address ({:#x})",
                e,
                offset,
                type_name(parent),
                parent_range.address
            );
            e
        })?;
        if !parent_range.contains_address(start)? {
            diagnostic!(
                context,
                "String at offset {} starts outside its {} parent {}",
                offset,
                type_name(parent),
                parent_range
            );
            return Err(MachError::ContainmentViolation {
                outer: parent_range,
                inner: VmRange::new(start, 1),
            });
        }

        let window = parent_bytes.tail(parent_range.offset_of(start)?)?;
        let limit = parent.macho().config().max_string_length.saturating_add(1);
        let scan = &window[..window.len().min(address::to_usize(limit).unwrap_or(usize::MAX))];
        let length = memchr::memchr(0, scan).ok_or_else(|| {
            diagnostic!(
                context,
                "String at {:#x} is not NUL-terminated within {} bytes",
                start,
                scan.len()
            );
            MachError::malformed(start, "unterminated string")
        })?;

        let size = length as VmSize + 1;
        let range = resolve_child(parent, offset, size)?;
        let mut mapped = Some(map_child(parent, range)?);
        let bytes = mapped.as_ref().map_or(&[][..], |object| object.as_bytes());
        // A live task can rewrite the bytes between the scan and the mapping.
        if bytes.get(length) != Some(&0) || memchr::memchr(0, &bytes[..length]).is_some() {
            diagnostic!(context, "String at {:#x} changed while it was being mapped", start);
            release_object(parent.macho(), &mut mapped, "string");
            return Err(MachError::malformed(start, "string terminator moved"));
        }
        let string = String::from_utf8_lossy(&bytes[..length]).into_owned();

        Ok(Self {
            record: Some(&CSTRING_CLASS),
            parent,
            offset,
            string,
            mapped,
        })
    }

    /// The decoded text, without the terminator; empty once freed.
    pub fn string(&self) -> &str {
        &self.string
    }

    /// The raw bytes, without the terminator; empty once freed.
    pub fn bytes(&self) -> &[u8] {
        self.mapped
            .as_ref()
            .map_or(&[][..], |object| &object.as_bytes()[..object.len().saturating_sub(1)])
    }

    /// Size including the terminator.
    pub fn node_size(&self) -> VmSize {
        self.mapped.as_ref().map_or(0, |object| object.range().size)
    }

    pub fn offset(&self) -> VmOffset {
        self.offset
    }

    pub fn parent(&self) -> &'a dyn BackedNode {
        self.parent
    }

    pub fn free(&mut self) {
        if self.record.take().is_none() {
            return;
        }
        release_object(self.parent.macho(), &mut self.mapped, "string");
        self.string.clear();
    }
}

impl Drop for CStringNode<'_> {
    fn drop(&mut self) {
        self.free();
    }
}

impl Node for CStringNode<'_> {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        self.parent.context()
    }
}

impl BackedNode for CStringNode<'_> {
    fn macho(&self) -> &MachImage {
        self.parent.macho()
    }

    fn mapped_object(&self) -> Option<&MappedObject> {
        self.mapped.as_ref()
    }
}
