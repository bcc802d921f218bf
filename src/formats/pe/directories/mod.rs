//! Data directory parsers

pub mod basereloc;
pub mod export;
pub mod import;
pub mod symbols;

pub use basereloc::parse_base_relocations;
pub use export::{parse_exports, ExportTable};
pub use import::parse_imports;
pub use symbols::parse_coff_symbols;

#[cfg(test)]
pub(crate) mod tests {
    use crate::formats::pe::sections::PeSection;
    use crate::formats::pe::types::SectionHeader;

    /// A 0x400-byte file whose only section maps RVA 0x1000 to offset 0x200.
    pub fn image() -> (Vec<u8>, Vec<PeSection>) {
        let header = SectionHeader {
            name: *b".rdata\0\0",
            virtual_size: 0x200,
            virtual_address: 0x1000,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: 0x200,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: 0,
        };
        (vec![0u8; 0x400], vec![PeSection::new(header, vec![0; 0x200])])
    }

    pub fn put_u16(data: &mut [u8], at: usize, value: u16) {
        data[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(data: &mut [u8], at: usize, value: u32) {
        data[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_cstr(data: &mut [u8], at: usize, s: &str) {
        data[at..at + s.len()].copy_from_slice(s.as_bytes());
        data[at + s.len()] = 0;
    }
}
