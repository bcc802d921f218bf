//! Generic symbol record.

use serde::{Deserialize, Serialize};

/// A named value from a symbol, export or import table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    /// Address or table-relative value, depending on the format.
    pub value: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(name: impl Into<String>, value: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            value,
            size,
        }
    }
}
