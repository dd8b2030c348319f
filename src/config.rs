//! Configuration for image parsing.
//!
//! Limits bound how much work a hostile image can make the parser do. All
//! values have sensible defaults and round-trip through JSON.

use crate::error::{MachError, Result};
use serde::{Deserialize, Serialize};

/// Resource limits enforced by the memory maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoLimits {
    /// Largest file a file map will open.
    pub max_file_size: u64,
    /// Largest single window copied out of a task.
    pub max_object_size: u64,
}

impl Default for IoLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024,  // 512MB
            max_object_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Master configuration for opening and walking an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// I/O limits handed to the memory map.
    pub io: IoLimits,
    /// Images declaring more load commands than this are rejected.
    pub max_load_commands: u32,
    /// Longest C-string (excluding the terminator) a string node will scan.
    pub max_string_length: u64,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            io: IoLimits::default(),
            max_load_commands: 4096,
            max_string_length: 64 * 1024,
        }
    }
}

impl ParseConfig {
    /// Deserialize from JSON; missing fields take their defaults.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| MachError::invalid(e.to_string()))
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| MachError::invalid(e.to_string()))
    }
}
