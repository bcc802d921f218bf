//! Section management for PE files

use crate::core::section::Section;
use crate::formats::bytes::{fixed_name, ByteSink, Endian, ReadExt};
use crate::formats::pe::types::*;

/// A section with its raw data copied out of the file.
///
/// `size` is the raw (on-disk) size and `virtual_size` the loader's view;
/// the two are set independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSection {
    pub header: SectionHeader,
    name: String,
    content: Vec<u8>,
}

impl PeSection {
    pub fn new(header: SectionHeader, content: Vec<u8>) -> Self {
        Self {
            name: fixed_name(&header.name),
            header,
            content,
        }
    }

    pub fn characteristics(&self) -> u32 {
        self.header.characteristics
    }

    pub fn set_characteristics(&mut self, characteristics: u32) {
        self.header.characteristics = characteristics;
    }

    pub fn set_virtual_size(&mut self, size: u32) {
        self.header.virtual_size = size;
    }

    pub fn pointerto_raw_data(&self) -> u32 {
        self.header.pointer_to_raw_data
    }

    pub fn sizeof_raw_data(&self) -> u32 {
        self.header.size_of_raw_data
    }

    /// Virtual extent the loader reserves, never smaller than the raw data.
    pub fn virtual_extent(&self) -> u32 {
        self.header.virtual_size.max(self.content.len() as u32)
    }

    fn grow_virtual_size(&mut self) {
        let len = self.content.len() as u32;
        if self.header.virtual_size < len {
            self.header.virtual_size = len;
        }
    }
}

impl Section for PeSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn virtual_address(&self) -> u64 {
        self.header.virtual_address as u64
    }

    fn size(&self) -> u64 {
        self.content.len() as u64
    }

    fn set_size(&mut self, size: u64) {
        self.content.resize(size as usize, 0);
        self.grow_virtual_size();
    }

    fn virtual_size(&self) -> u64 {
        self.header.virtual_size as u64
    }

    fn file_offset(&self) -> u64 {
        self.header.pointer_to_raw_data as u64
    }

    fn content(&self) -> &[u8] {
        &self.content
    }

    fn content_mut(&mut self) -> &mut [u8] {
        &mut self.content
    }

    fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
        self.grow_virtual_size();
    }

    fn has_file_data(&self) -> bool {
        self.header.pointer_to_raw_data != 0 && !self.content.is_empty()
    }
}

/// Parse the section table and copy each section's raw data.
pub fn parse_section_table(
    data: &[u8],
    offset: usize,
    count: u16,
) -> Result<Vec<PeSection>> {
    let mut sections = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let entry_offset = offset + i * 40;
        let header = parse_section_header(data, entry_offset)?;

        let content = if header.pointer_to_raw_data == 0 || header.size_of_raw_data == 0 {
            Vec::new()
        } else {
            data.read_slice_at(
                header.pointer_to_raw_data as usize,
                header.size_of_raw_data as usize,
            )
            .ok_or_else(|| PeError::SectionOutOfBounds {
                name: fixed_name(&header.name),
                offset: header.pointer_to_raw_data,
                size: header.size_of_raw_data,
            })?
            .to_vec()
        };

        sections.push(PeSection::new(header, content));
    }

    Ok(sections)
}

fn parse_section_header(data: &[u8], offset: usize) -> Result<SectionHeader> {
    let raw = data
        .read_slice_at(offset, 40)
        .ok_or(PeError::TruncatedHeader {
            expected: offset + 40,
            actual: data.len(),
        })?;
    let le = Endian::Little;
    let bad = || PeError::InvalidOffset { offset };

    let mut name = [0u8; 8];
    name.copy_from_slice(&raw[0..8]);

    Ok(SectionHeader {
        name,
        virtual_size: raw.read_u32_at(8, le).ok_or_else(bad)?,
        virtual_address: raw.read_u32_at(12, le).ok_or_else(bad)?,
        size_of_raw_data: raw.read_u32_at(16, le).ok_or_else(bad)?,
        pointer_to_raw_data: raw.read_u32_at(20, le).ok_or_else(bad)?,
        pointer_to_relocations: raw.read_u32_at(24, le).ok_or_else(bad)?,
        pointer_to_line_numbers: raw.read_u32_at(28, le).ok_or_else(bad)?,
        number_of_relocations: raw.read_u16_at(32, le).ok_or_else(bad)?,
        number_of_line_numbers: raw.read_u16_at(34, le).ok_or_else(bad)?,
        characteristics: raw.read_u32_at(36, le).ok_or_else(bad)?,
    })
}

pub fn encode_section_header(sink: &mut ByteSink, header: &SectionHeader) {
    sink.bytes(&header.name)
        .u32(header.virtual_size)
        .u32(header.virtual_address)
        .u32(header.size_of_raw_data)
        .u32(header.pointer_to_raw_data)
        .u32(header.pointer_to_relocations)
        .u32(header.pointer_to_line_numbers)
        .u16(header.number_of_relocations)
        .u16(header.number_of_line_numbers)
        .u32(header.characteristics);
}

/// RVA to file offset over raw section headers, for directory walking.
pub fn rva_to_offset(sections: &[PeSection], rva: u32) -> Option<usize> {
    sections
        .iter()
        .find(|s| {
            rva >= s.header.virtual_address
                && rva - s.header.virtual_address < s.header.size_of_raw_data
        })
        .map(|s| (s.header.pointer_to_raw_data + (rva - s.header.virtual_address)) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &[u8], va: u32, vsize: u32, ptr: u32, raw: u32) -> SectionHeader {
        let mut n = [0u8; 8];
        n[..name.len()].copy_from_slice(name);
        SectionHeader {
            name: n,
            virtual_size: vsize,
            virtual_address: va,
            size_of_raw_data: raw,
            pointer_to_raw_data: ptr,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ,
        }
    }

    #[test]
    fn test_parse_section_table() {
        let mut data = vec![0u8; 0x400];
        let mut sink = ByteSink::new(Endian::Little);
        encode_section_header(&mut sink, &header(b".text", 0x1000, 0x10, 0x200, 0x200));
        data[0x100..0x128].copy_from_slice(&sink.into_inner());
        data[0x200] = 0xc3;

        let sections = parse_section_table(&data, 0x100, 1).unwrap();
        assert_eq!(sections[0].name(), ".text");
        assert_eq!(sections[0].size(), 0x200);
        assert_eq!(sections[0].virtual_size(), 0x10);
        assert_eq!(sections[0].content()[0], 0xc3);
        assert_eq!(rva_to_offset(&sections, 0x1004), Some(0x204));
        assert_eq!(rva_to_offset(&sections, 0x1200), None);
    }

    #[test]
    fn test_raw_data_out_of_bounds() {
        let mut data = vec![0u8; 0x200];
        let mut sink = ByteSink::new(Endian::Little);
        encode_section_header(&mut sink, &header(b".data", 0x2000, 0x10, 0x180, 0x200));
        data[0..40].copy_from_slice(&sink.into_inner());
        assert!(matches!(
            parse_section_table(&data, 0, 1),
            Err(PeError::SectionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_set_content_grows_virtual_size() {
        let mut section = PeSection::new(header(b".text", 0x1000, 0x10, 0x200, 0x20), vec![0; 0x20]);
        section.set_content(vec![0x90; 0x30]);
        assert_eq!(section.size(), 0x30);
        assert_eq!(section.virtual_size(), 0x30);

        section.set_virtual_size(0x1000);
        section.set_content(vec![0x90; 4]);
        assert_eq!(section.virtual_size(), 0x1000);
        assert_eq!(section.offset(), 0x200);
    }
}
