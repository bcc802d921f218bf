//! Serializable digest of a parsed binary.

use crate::core::binary::{Binary, Format, GenericBinary, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub name: String,
    pub virtual_address: u64,
    pub size: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    /// Hash of the section bytes; absent for sections without file data.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySummary {
    pub format: Format,
    pub header: Header,
    pub is_pie: bool,
    pub has_nx: bool,
    pub sections: Vec<SectionSummary>,
    pub segment_count: usize,
    pub symbol_count: usize,
    pub relocation_count: usize,
}

impl BinarySummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Binary {
    pub fn summary(&self) -> BinarySummary {
        let sections = GenericBinary::sections(self)
            .into_iter()
            .map(|s| SectionSummary {
                name: s.name().to_string(),
                virtual_address: s.virtual_address(),
                size: s.size(),
                virtual_size: s.virtual_size(),
                file_offset: s.file_offset(),
                sha256: s.has_file_data().then(|| sha256_hex(s.content())),
            })
            .collect();

        BinarySummary {
            format: self.format(),
            header: self.header(),
            is_pie: self.is_pie(),
            has_nx: self.has_nx(),
            sections,
            segment_count: GenericBinary::segments(self).len(),
            symbol_count: self.symbols().len(),
            relocation_count: self.relocations().len(),
        }
    }
}
