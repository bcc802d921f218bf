//! Section table parsing and encoding

use crate::core::section::Section;
use crate::formats::bytes::{cstring_lossy_at, ByteSink, ReadExt};
use crate::formats::elf::types::*;

/// A section with its resolved name and owned content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSection {
    pub header: SectionHeader,
    name: String,
    content: Vec<u8>,
    original_size: u64,
}

impl ElfSection {
    pub fn new(header: SectionHeader, name: String, content: Vec<u8>) -> Self {
        Self {
            original_size: header.sh_size,
            header,
            name,
            content,
        }
    }

    /// `sh_size` as parsed, before any edit.
    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn section_type(&self) -> u32 {
        self.header.sh_type
    }

    pub fn flags(&self) -> u64 {
        self.header.sh_flags
    }

    pub fn is_nobits(&self) -> bool {
        self.header.sh_type == SHT_NOBITS
    }

    pub fn is_allocated(&self) -> bool {
        (self.header.sh_flags & SHF_ALLOC) != 0
    }

    pub fn is_executable(&self) -> bool {
        (self.header.sh_flags & SHF_EXECINSTR) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.header.sh_flags & SHF_WRITE) != 0
    }

    pub fn alignment(&self) -> u64 {
        self.header.sh_addralign
    }
}

impl Section for ElfSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn virtual_address(&self) -> u64 {
        self.header.sh_addr
    }

    fn size(&self) -> u64 {
        self.header.sh_size
    }

    fn set_size(&mut self, size: u64) {
        if !self.is_nobits() {
            self.content.resize(size as usize, 0);
        }
        self.header.sh_size = size;
    }

    fn file_offset(&self) -> u64 {
        self.header.sh_offset
    }

    fn content(&self) -> &[u8] {
        &self.content
    }

    fn content_mut(&mut self) -> &mut [u8] {
        &mut self.content
    }

    fn set_content(&mut self, content: Vec<u8>) {
        if self.is_nobits() {
            // NOBITS sections have no file bytes; only the size is kept.
            crate::log_warn!(section = %self.name, "Content set on NOBITS section, keeping size only");
            self.header.sh_size = content.len() as u64;
            return;
        }
        self.header.sh_size = content.len() as u64;
        self.content = content;
    }

    fn has_file_data(&self) -> bool {
        !self.is_nobits() && self.header.sh_type != SHT_NULL
    }
}

/// Number of section headers, honoring extended numbering in entry 0.
fn section_count(data: &[u8], header: &ElfHeader) -> Result<usize> {
    if header.e_shoff == 0 {
        return Ok(0);
    }
    if header.e_shnum != 0 {
        return Ok(header.e_shnum as usize);
    }
    let first = parse_section_header(data, header.e_shoff as usize, header.class(), header.endian())?;
    Ok(first.sh_size as usize)
}

/// Parse the whole section table, resolving names and copying content out.
pub fn parse_sections(data: &[u8], header: &ElfHeader) -> Result<Vec<ElfSection>> {
    let count = section_count(data, header)?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let sh_offset = header.e_shoff as usize;
    let entsize = header.e_shentsize as usize;
    let total = count
        .checked_mul(entsize)
        .ok_or(ElfError::LimitExceeded("section header table size"))?;
    if sh_offset.checked_add(total).map_or(true, |end| end > data.len()) {
        return Err(ElfError::Truncated {
            offset: sh_offset,
            needed: total,
        });
    }

    let mut headers = Vec::with_capacity(count);
    for i in 0..count {
        headers.push(parse_section_header(
            data,
            sh_offset + i * entsize,
            header.class(),
            header.endian(),
        )?);
    }

    let shstrndx = match header.e_shstrndx {
        SHN_XINDEX => headers[0].sh_link as usize,
        idx => idx as usize,
    };
    let strings = headers
        .get(shstrndx)
        .filter(|h| h.sh_type != SHT_NOBITS)
        .and_then(|h| data.read_slice_at(h.sh_offset as usize, h.sh_size as usize))
        .unwrap_or(&[]);

    let mut sections = Vec::with_capacity(count);
    for (index, sh) in headers.into_iter().enumerate() {
        let name = cstring_lossy_at(strings, sh.sh_name as usize).unwrap_or_default();
        let content = if sh.sh_type == SHT_NOBITS || sh.sh_type == SHT_NULL {
            Vec::new()
        } else {
            data.read_slice_at(sh.sh_offset as usize, sh.sh_size as usize)
                .ok_or(ElfError::SectionOutOfBounds {
                    index,
                    offset: sh.sh_offset,
                    size: sh.sh_size,
                })?
                .to_vec()
        };
        sections.push(ElfSection::new(sh, name, content));
    }

    Ok(sections)
}

/// Parse a single section header
pub fn parse_section_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: crate::formats::bytes::Endian,
) -> Result<SectionHeader> {
    let needed = class.shdr_size();
    let entry = data
        .read_slice_at(offset, needed)
        .ok_or(ElfError::Truncated { offset, needed })?;
    let bad = || ElfError::Truncated { offset, needed };

    match class {
        ElfClass::Elf32 => Ok(SectionHeader {
            sh_name: entry.read_u32_at(0, endian).ok_or_else(bad)?,
            sh_type: entry.read_u32_at(4, endian).ok_or_else(bad)?,
            sh_flags: entry.read_u32_at(8, endian).ok_or_else(bad)? as u64,
            sh_addr: entry.read_u32_at(12, endian).ok_or_else(bad)? as u64,
            sh_offset: entry.read_u32_at(16, endian).ok_or_else(bad)? as u64,
            sh_size: entry.read_u32_at(20, endian).ok_or_else(bad)? as u64,
            sh_link: entry.read_u32_at(24, endian).ok_or_else(bad)?,
            sh_info: entry.read_u32_at(28, endian).ok_or_else(bad)?,
            sh_addralign: entry.read_u32_at(32, endian).ok_or_else(bad)? as u64,
            sh_entsize: entry.read_u32_at(36, endian).ok_or_else(bad)? as u64,
        }),
        ElfClass::Elf64 => Ok(SectionHeader {
            sh_name: entry.read_u32_at(0, endian).ok_or_else(bad)?,
            sh_type: entry.read_u32_at(4, endian).ok_or_else(bad)?,
            sh_flags: entry.read_u64_at(8, endian).ok_or_else(bad)?,
            sh_addr: entry.read_u64_at(16, endian).ok_or_else(bad)?,
            sh_offset: entry.read_u64_at(24, endian).ok_or_else(bad)?,
            sh_size: entry.read_u64_at(32, endian).ok_or_else(bad)?,
            sh_link: entry.read_u32_at(40, endian).ok_or_else(bad)?,
            sh_info: entry.read_u32_at(44, endian).ok_or_else(bad)?,
            sh_addralign: entry.read_u64_at(48, endian).ok_or_else(bad)?,
            sh_entsize: entry.read_u64_at(56, endian).ok_or_else(bad)?,
        }),
    }
}

/// Append one encoded section header to `sink`.
pub fn encode_section_header(sink: &mut ByteSink, sh: &SectionHeader, class: ElfClass) {
    let wide = class.is_64();
    sink.u32(sh.sh_name)
        .u32(sh.sh_type)
        .addr(sh.sh_flags, wide)
        .addr(sh.sh_addr, wide)
        .addr(sh.sh_offset, wide)
        .addr(sh.sh_size, wide)
        .u32(sh.sh_link)
        .u32(sh.sh_info)
        .addr(sh.sh_addralign, wide)
        .addr(sh.sh_entsize, wide);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::bytes::Endian;
    use crate::formats::elf::headers::parse_header;

    fn put_shdr(data: &mut [u8], at: usize, sh: &SectionHeader) {
        let mut sink = ByteSink::new(Endian::Little);
        encode_section_header(&mut sink, sh, ElfClass::Elf64);
        data[at..at + 64].copy_from_slice(&sink.into_inner());
    }

    fn create_test_elf_with_sections() -> Vec<u8> {
        let mut data = vec![0u8; 0x400];
        data[0..4].copy_from_slice(ELF_MAGIC);
        data[4] = 2;
        data[5] = 1;
        data[6] = 1;
        data[16..18].copy_from_slice(&2u16.to_le_bytes());
        data[18..20].copy_from_slice(&62u16.to_le_bytes());
        data[40..48].copy_from_slice(&0x200u64.to_le_bytes()); // e_shoff
        data[52..54].copy_from_slice(&64u16.to_le_bytes());
        data[58..60].copy_from_slice(&64u16.to_le_bytes());
        data[60..62].copy_from_slice(&4u16.to_le_bytes()); // e_shnum
        data[62..64].copy_from_slice(&3u16.to_le_bytes()); // e_shstrndx

        data[0x100..0x104].copy_from_slice(&[0x90, 0x90, 0xc3, 0x00]);
        let names = b"\0.text\0.bss\0.shstrtab\0";
        data[0x180..0x180 + names.len()].copy_from_slice(names);

        put_shdr(&mut data, 0x240, &SectionHeader {
            sh_name: 1,
            sh_type: SHT_PROGBITS,
            sh_flags: SHF_ALLOC | SHF_EXECINSTR,
            sh_addr: 0x1100,
            sh_offset: 0x100,
            sh_size: 4,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 16,
            sh_entsize: 0,
        });
        put_shdr(&mut data, 0x280, &SectionHeader {
            sh_name: 7,
            sh_type: SHT_NOBITS,
            sh_flags: SHF_ALLOC | SHF_WRITE,
            sh_addr: 0x2000,
            sh_offset: 0x104,
            sh_size: 0x1000,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 8,
            sh_entsize: 0,
        });
        put_shdr(&mut data, 0x2c0, &SectionHeader {
            sh_name: 12,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: 0x180,
            sh_size: names.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        });
        data
    }

    #[test]
    fn test_parse_sections() {
        let data = create_test_elf_with_sections();
        let header = parse_header(&data).unwrap();
        let sections = parse_sections(&data, &header).unwrap();

        assert_eq!(sections.len(), 4);
        assert_eq!(sections[1].name(), ".text");
        assert_eq!(sections[1].content(), &[0x90, 0x90, 0xc3, 0x00]);
        assert!(sections[1].is_executable());
        assert_eq!(sections[2].name(), ".bss");
        assert!(sections[2].content().is_empty());
        assert_eq!(sections[2].size(), 0x1000);
        assert!(!sections[2].has_file_data());
        assert_eq!(sections[3].name(), ".shstrtab");
    }

    #[test]
    fn test_section_out_of_bounds() {
        let mut data = create_test_elf_with_sections();
        // Push .text size past the end of the image
        data[0x240 + 32..0x240 + 40].copy_from_slice(&0x10_0000u64.to_le_bytes());
        let header = parse_header(&data).unwrap();
        assert!(matches!(
            parse_sections(&data, &header),
            Err(ElfError::SectionOutOfBounds { index: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_table() {
        let data = create_test_elf_with_sections();
        let header = parse_header(&data).unwrap();
        assert!(matches!(
            parse_sections(&data[..0x2a0], &header),
            Err(ElfError::Truncated { offset: 0x200, .. })
        ));
    }

    #[test]
    fn test_set_size_and_content() {
        let data = create_test_elf_with_sections();
        let header = parse_header(&data).unwrap();
        let mut sections = parse_sections(&data, &header).unwrap();

        sections[1].set_size(8);
        assert_eq!(sections[1].content(), &[0x90, 0x90, 0xc3, 0, 0, 0, 0, 0]);
        sections[1].set_content(vec![0xcc; 2]);
        assert_eq!(sections[1].size(), 2);

        sections[2].set_content(vec![1, 2, 3]);
        assert_eq!(sections[2].size(), 3);
        assert!(sections[2].content().is_empty());
    }
}
