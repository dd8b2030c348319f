//! Validated, node-based access to thin Mach-O images.
//!
//! An image is opened over a [`io::MemoryMap`] (a file or a live task) and
//! walked as a tree of nodes: the image, its load commands, segments,
//! sections and strings. Every node validates its range against its parent
//! with overflow-checked arithmetic before it maps any bytes.

/// Core data types module
pub mod core;

pub mod config;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;

pub use crate::config::{IoLimits, ParseConfig};
pub use crate::core::address::{VmAddress, VmOffset, VmSize};
pub use crate::core::address_range::VmRange;
pub use crate::core::context::{Context, ContextFlags, Diagnostic, Severity};
pub use crate::core::types::{BackedNode, Node, TypeRecord};
pub use crate::error::{ErrorKind, MachError, Result};
pub use crate::formats::macho::{
    CStringNode, ImageOptions, LoadCommand, MachImage, OffsetNode, Section, Segment,
};
pub use crate::io::{Addressing, FileMemoryMap, MappedObject, MemoryMap};
