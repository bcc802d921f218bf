//! Configuration for parsing and writing.
//!
//! Every knob has a default, so `EngineConfig::default()` is what `parse`
//! and `write` use when the caller passes nothing. The whole tree round-trips
//! through JSON, which lets tools keep a config file next to their inputs.

use crate::io::IOLimits;
use serde::{Deserialize, Serialize};

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Input file limits.
    pub io: IOLimits,
    /// Parser behavior and table limits.
    pub parse: ParseConfig,
    /// Serializer behavior.
    pub write: WriteConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Parser configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Decode symbol tables.
    pub parse_symbols: bool,
    /// Decode relocation tables.
    pub parse_relocations: bool,
    /// Upper bound on decoded symbols per binary.
    pub max_symbols: usize,
    /// Upper bound on decoded relocations per binary.
    pub max_relocations: usize,
    /// Upper bound on Mach-O load commands.
    pub max_load_commands: u32,
    /// Upper bound on slices in a fat envelope.
    pub max_fat_arches: u32,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            parse_symbols: true,
            parse_relocations: true,
            max_symbols: 1_000_000,
            max_relocations: 1_000_000,
            max_load_commands: 4096,
            max_fat_arches: 64,
        }
    }
}

/// Serializer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Refuse to write when the entrypoint is not backed by the image.
    pub check_entrypoint: bool,
    /// Refresh a non-zero PE checksum when the output differs from the input.
    pub recompute_pe_checksum: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            check_entrypoint: true,
            recompute_pe_checksum: true,
        }
    }
}
