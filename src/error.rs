//! Error types for the machnode Mach-O parser.
//!
//! Every fallible operation in the crate returns a [`MachError`]. Callers that
//! only care about the outcome class can match on [`MachError::kind`], which
//! collapses the variants onto the closed set of result codes.

use crate::core::address_range::VmRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The closed set of failure outcomes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Ill-formed caller input, including use of a freed node.
    InvalidArgument,
    /// Address overflow or underflow during slide or range math.
    Arithmetic,
    /// A child range is not fully inside its parent's validated range.
    ContainmentViolation,
    /// A fixed-layout record could not be decoded.
    MalformedRecord,
    /// The memory map could not produce bytes for a range.
    BackingStoreUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Arithmetic => "arithmetic error",
            ErrorKind::ContainmentViolation => "containment violation",
            ErrorKind::MalformedRecord => "malformed record",
            ErrorKind::BackingStoreUnavailable => "backing store unavailable",
        };
        f.write_str(name)
    }
}

/// Main error type for machnode operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachError {
    /// Caller input was rejected before anything was read
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `base + operand` does not fit in the address width
    #[error("Arithmetic overflow: {base:#x} + {operand:#x}")]
    Overflow { base: u64, operand: u64 },

    /// `base - operand` would drop below zero
    #[error("Arithmetic underflow: {base:#x} - {operand:#x}")]
    Underflow { base: u64, operand: u64 },

    /// Child range escapes its parent
    #[error("Range {inner} is not contained in {outer}")]
    ContainmentViolation { outer: VmRange, inner: VmRange },

    /// Not enough bytes left to decode a fixed-size field or record
    #[error("Truncated record at offset {offset:#x}, needed {needed} bytes")]
    Truncated { offset: u64, needed: u64 },

    /// A record decoded but its contents are inconsistent
    #[error("Malformed record at offset {offset:#x}: {message}")]
    Malformed { offset: u64, message: String },

    /// The memory map could not back the requested range
    #[error("Backing store unavailable for {range}: {reason}")]
    Unavailable { range: VmRange, reason: String },
}

impl MachError {
    /// The result code this error reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MachError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MachError::Overflow { .. } | MachError::Underflow { .. } => ErrorKind::Arithmetic,
            MachError::ContainmentViolation { .. } => ErrorKind::ContainmentViolation,
            MachError::Truncated { .. } | MachError::Malformed { .. } => {
                ErrorKind::MalformedRecord
            }
            MachError::Unavailable { .. } => ErrorKind::BackingStoreUnavailable,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        MachError::InvalidArgument(message.into())
    }

    pub(crate) fn malformed(offset: u64, message: impl Into<String>) -> Self {
        MachError::Malformed {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn unavailable(range: VmRange, reason: impl ToString) -> Self {
        MachError::Unavailable {
            range,
            reason: reason.to_string(),
        }
    }

    /// Rebase a `Truncated`/`Malformed` offset that was reported relative to a
    /// record onto the record's own position.
    pub(crate) fn at_record(self, record_offset: u64) -> Self {
        match self {
            MachError::Truncated { offset, needed } => MachError::Truncated {
                offset: record_offset.saturating_add(offset),
                needed,
            },
            MachError::Malformed { offset, message } => MachError::Malformed {
                offset: record_offset.saturating_add(offset),
                message,
            },
            other => other,
        }
    }
}

/// Result type alias for machnode operations
pub type Result<T> = std::result::Result<T, MachError>;
