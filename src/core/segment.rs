//! Generic segment view and section containment.

use crate::core::section::Section;
use serde::{Deserialize, Serialize};

/// A loadable range of the file mapped into memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment name, or the program header type for ELF.
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
}

impl Segment {
    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset - self.file_offset < self.file_size
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.virtual_address && address - self.virtual_address < self.virtual_size
    }

    /// A section belongs to the segment whose file range holds its offset.
    ///
    /// Computed on demand so neither table keeps links into the other.
    pub fn contains_section(&self, section: &dyn Section) -> bool {
        section.has_file_data() && self.contains_offset(section.file_offset())
    }
}
