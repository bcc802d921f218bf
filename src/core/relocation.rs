//! Generic relocation record.

use serde::{Deserialize, Serialize};

/// A location the loader or linker rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relocation {
    pub address: u64,
    /// Width of the patched field in bits.
    pub size: u32,
}
