//! Nodes located at an offset inside another node.

use crate::core::address::{VmOffset, VmSize};
use crate::core::address_range::VmRange;
use crate::core::context::Context;
use crate::core::types::{require_live, type_name, BackedNode, Node, TypeRecord, TYPE_CLASS};
use crate::diagnostic;
use crate::error::Result;
use crate::formats::macho::{release_object, MachImage};
use crate::io::MappedObject;

pub static OFFSET_NODE_CLASS: TypeRecord = TypeRecord {
    parent: Some(&TYPE_CLASS),
    name: "offset_node",
};

/// `size` bytes starting `offset` bytes into a backed parent node.
pub struct OffsetNode<'a> {
    record: Option<&'static TypeRecord>,
    parent: &'a dyn BackedNode,
    offset: VmOffset,
    mapped: Option<MappedObject>,
}

impl<'a> OffsetNode<'a> {
    pub fn new(parent: &'a dyn BackedNode, offset: VmOffset, size: VmSize) -> Result<Self> {
        let range = resolve_child(parent, offset, size)?;
        let mapped = map_child(parent, range)?;
        Ok(Self {
            record: Some(&OFFSET_NODE_CLASS),
            parent,
            offset,
            mapped: Some(mapped),
        })
    }

    pub fn parent(&self) -> &'a dyn BackedNode {
        self.parent
    }

    /// Offset from the parent's start.
    pub fn offset(&self) -> VmOffset {
        self.offset
    }

    /// Size of the node; zero once freed.
    pub fn size(&self) -> VmSize {
        self.mapped.as_ref().map_or(0, |object| object.range().size)
    }

    pub fn data(&self) -> &[u8] {
        self.mapped.as_ref().map_or(&[][..], MappedObject::as_bytes)
    }

    pub fn free(&mut self) {
        if self.record.take().is_none() {
            return;
        }
        release_object(self.parent.macho(), &mut self.mapped, "offset node");
    }
}

impl Drop for OffsetNode<'_> {
    fn drop(&mut self) {
        self.free();
    }
}

impl Node for OffsetNode<'_> {
    fn type_record(&self) -> Option<&'static TypeRecord> {
        self.record
    }

    fn context(&self) -> &Context {
        self.parent.context()
    }
}

impl BackedNode for OffsetNode<'_> {
    fn macho(&self) -> &MachImage {
        self.parent.macho()
    }

    fn mapped_object(&self) -> Option<&MappedObject> {
        self.mapped.as_ref()
    }
}

/// The range `size` bytes at `offset` into `parent`, checked to lie inside
/// the parent's range.
pub(crate) fn resolve_child(
    parent: &dyn BackedNode,
    offset: VmOffset,
    size: VmSize,
) -> Result<VmRange> {
    require_live(parent)?;
    let context = parent.context();
    let parent_range = parent.node_range()?;

    let range = parent_range.offset_range(offset, size).map_err(|e| {
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

    parent_range.check_contains(&range, true).map_err(|e| {
        diagnostic!(
            context,
            "Node {} at offset {} is not within its {} parent {}",
            range,
            offset,
            type_name(parent),
            parent_range
        );
        e
    })?;
    Ok(range)
}

pub(crate) fn map_child(parent: &dyn BackedNode, range: VmRange) -> Result<MappedObject> {
    parent
        .macho()
        .memory_map()
        .init_object(0, range.address, range.size, true)
        .map_err(|e| {
            diagnostic!(parent.context(), "Failed to init memory object at {}: {}", range, e);
            e
        })
}
