//! Core types for machnode.
//!
//! Address arithmetic, ranges, the per-image diagnostic context and the node
//! type system every Mach-O structure is built on.

pub mod address;
pub mod address_range;
pub mod context;
pub mod types;
