//! Node kinds and capability dispatch.
//!
//! Every node kind has one constant [`TypeRecord`] shared by all instances of
//! that kind. Records link to their super-record, forming a single-inheritance
//! chain rooted at [`TYPE_CLASS`]; "is instance of K" is a walk up that chain.
//! Capabilities (context lookup, mapped bytes) are dispatched through the
//! [`Node`] and [`BackedNode`] traits.
//!
//! A node that has been freed reports no record at all. Capability calls made
//! through [`checked_context`] or [`BackedNode::node_range`] on such a node
//! fail with `InvalidArgument` instead of touching stale state.

use crate::core::address_range::VmRange;
use crate::core::context::Context;
use crate::error::{MachError, Result};
use crate::formats::macho::MachImage;
use crate::io::MappedObject;
use std::fmt;

/// Constant descriptor of one node kind.
pub struct TypeRecord {
    /// The kind this one specializes, `None` only for the root.
    pub parent: Option<&'static TypeRecord>,
    /// Display name of the kind.
    pub name: &'static str,
}

/// Root of every record chain.
pub static TYPE_CLASS: TypeRecord = TypeRecord {
    parent: None,
    name: "type",
};

impl TypeRecord {
    /// This record followed by each of its super-records.
    pub fn ancestors(&'static self) -> Ancestors {
        Ancestors { next: Some(self) }
    }

    /// Whether `self` is `other` or a descendant of it.
    pub fn is_a(&'static self, other: &TypeRecord) -> bool {
        self.ancestors().any(|record| std::ptr::eq(record, other))
    }
}

impl fmt::Debug for TypeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRecord")
            .field("name", &self.name)
            .field("parent", &self.parent.map(|p| p.name))
            .finish()
    }
}

/// Iterator over a record chain.
pub struct Ancestors {
    next: Option<&'static TypeRecord>,
}

impl Iterator for Ancestors {
    type Item = &'static TypeRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent;
        Some(current)
    }
}

/// Capabilities common to every parsed node.
pub trait Node {
    /// The node's kind, or `None` once the node has been freed.
    fn type_record(&self) -> Option<&'static TypeRecord>;

    /// The context of the image this node descends from.
    ///
    /// Still answers after the node has been freed; use [`checked_context`]
    /// to reject freed nodes.
    fn context(&self) -> &Context;
}

/// A node that owns a validated, mapped window of bytes and can anchor
/// offset nodes.
pub trait BackedNode: Node {
    /// The image this node descends from.
    fn macho(&self) -> &MachImage;

    /// The window acquired during initialization; `None` after free.
    fn mapped_object(&self) -> Option<&MappedObject>;

    /// The validated range in the memory map's address space.
    fn node_range(&self) -> Result<VmRange> {
        self.mapped_object().map(MappedObject::range).ok_or_else(|| {
            MachError::invalid(format!("{} node has been freed", type_name(self)))
        })
    }
}

/// Whether `node` is live and its kind is `record` or descends from it.
pub fn is_instance_of<N: Node + ?Sized>(node: &N, record: &TypeRecord) -> bool {
    node.type_record().is_some_and(|own| own.is_a(record))
}

/// Display name of `node`'s kind.
pub fn type_name<N: Node + ?Sized>(node: &N) -> &'static str {
    node.type_record().map_or("<freed>", |record| record.name)
}

/// Fails with `InvalidArgument` if `node` has been freed.
pub fn require_live<N: Node + ?Sized>(node: &N) -> Result<&'static TypeRecord> {
    node.type_record()
        .ok_or_else(|| MachError::invalid("node has been freed"))
}

/// Context lookup that refuses freed nodes.
pub fn checked_context<N: Node + ?Sized>(node: &N) -> Result<&Context> {
    require_live(node)?;
    Ok(node.context())
}
