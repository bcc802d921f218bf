//! ELF (Executable and Linkable Format) support
//!
//! [`ElfBinary`] owns the file image and a decoded copy of every table.
//! Section contents are owned per section; bytes no section covers stay in
//! the background image and are reachable through `PT_LOAD` segments.

pub mod headers;
pub mod relocations;
pub mod sections;
pub mod segments;
pub mod symbols;
pub mod types;
mod writer;

use crate::config::{ParseConfig, WriteConfig};
use crate::core::binary::{Format, GenericBinary, Header, ObjectType};
use crate::core::relocation::Relocation;
use crate::core::section::Section;
use crate::core::segment::Segment;
use crate::core::symbol::Symbol;
use crate::core::translate::{self, AddressSpace, Mapping, Region};
use crate::formats::bytes::WriteExt;
use headers::parse_header;
pub use sections::ElfSection;
pub use segments::ElfSegment;
pub use types::*;

/// A parsed ELF file.
#[derive(Debug, Clone)]
pub struct ElfBinary {
    header: ElfHeader,
    sections: Vec<ElfSection>,
    segments: Vec<ElfSegment>,
    symbols: Vec<ElfSymbol>,
    relocations: Vec<ElfRelocation>,
    /// File bytes up to the end of the last structure.
    image: Vec<u8>,
    /// Trailing bytes no header describes.
    overlay: Vec<u8>,
}

impl ElfBinary {
    /// Parse ELF from raw data
    pub fn parse(data: &[u8], config: &ParseConfig) -> Result<Self> {
        let _span = crate::span_trace!("parse_elf", size = data.len()).entered();

        let header = parse_header(data)?;
        let class = header.class();
        let endian = header.endian();

        let sections = sections::parse_sections(data, &header)?;
        let segments = segments::parse_segments(data, &header)?;

        let symbols = if config.parse_symbols {
            symbols::parse_symbols(&sections, class, endian, config.max_symbols)?
        } else {
            Vec::new()
        };
        let relocations = if config.parse_relocations {
            relocations::parse_relocations(&sections, class, endian, config.max_relocations)?
        } else {
            Vec::new()
        };

        let end = structural_end(data, &header, &sections, &segments);
        let (image, overlay) = data.split_at(end);

        crate::log_debug!(
            sections = sections.len(),
            segments = segments.len(),
            symbols = symbols.len(),
            relocations = relocations.len(),
            overlay = overlay.len(),
            "Parsed ELF"
        );

        Ok(Self {
            header,
            sections,
            segments,
            symbols,
            relocations,
            image: image.to_vec(),
            overlay: overlay.to_vec(),
        })
    }

    pub fn elf_header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ElfHeader {
        &mut self.header
    }

    pub fn sections(&self) -> &[ElfSection] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut [ElfSection] {
        &mut self.sections
    }

    /// Program headers in table order.
    pub fn segments(&self) -> &[ElfSegment] {
        &self.segments
    }

    pub fn get_section(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn get_section_mut(&mut self, name: &str) -> Option<&mut ElfSection> {
        self.sections.iter_mut().find(|s| s.name() == name)
    }

    /// Sections whose file range lies inside the given program header.
    pub fn sections_in_segment(&self, index: usize) -> Vec<&ElfSection> {
        let Some(segment) = self.segments.get(index).map(ElfSegment::to_segment) else {
            return Vec::new();
        };
        self.sections
            .iter()
            .filter(|s| segment.contains_section(*s))
            .collect()
    }

    /// Dynamic symbols first, then static ones.
    pub fn symbol_entries(&self) -> &[ElfSymbol] {
        &self.symbols
    }

    pub fn relocation_entries(&self) -> &[ElfRelocation] {
        &self.relocations
    }

    /// Get interpreter path
    pub fn interpreter(&self) -> Option<String> {
        segments::interpreter(&self.segments, &self.image)
    }

    pub fn has_interpreter(&self) -> bool {
        self.segments.iter().any(|s| s.header.p_type == PT_INTERP)
    }

    pub fn has_overlay(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn overlay(&self) -> &[u8] {
        &self.overlay
    }

    pub fn set_overlay(&mut self, overlay: Vec<u8>) {
        self.overlay = overlay;
    }

    fn object_type(&self) -> ObjectType {
        match self.header.file_type() {
            ElfType::Executable => ObjectType::Executable,
            ElfType::SharedObject if self.has_interpreter() => ObjectType::Executable,
            ElfType::SharedObject => ObjectType::Library,
            ElfType::Relocatable => ObjectType::Object,
            ElfType::Core => ObjectType::Core,
            ElfType::None => ObjectType::Unknown,
        }
    }
}

/// End of the last byte any header, table, section or segment claims.
fn structural_end(
    data: &[u8],
    header: &ElfHeader,
    sections: &[ElfSection],
    segments: &[ElfSegment],
) -> usize {
    let class = header.class();
    let mut end = class.header_size() as u64;
    if header.e_phoff != 0 {
        end = end.max(header.e_phoff + header.e_phnum as u64 * header.e_phentsize as u64);
    }
    if header.e_shoff != 0 {
        end = end.max(header.e_shoff + sections.len() as u64 * header.e_shentsize as u64);
    }
    for section in sections.iter().filter(|s| s.has_file_data()) {
        end = end.max(section.header.sh_offset + section.header.sh_size);
    }
    for segment in segments {
        end = end.max(segment.header.p_offset + segment.header.p_filesz);
    }
    end.min(data.len() as u64) as usize
}

impl AddressSpace for ElfBinary {
    fn mappings(&self) -> Vec<Mapping> {
        let sections = self
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_allocated() && s.has_file_data())
            .map(|(i, s)| Mapping {
                region: Region::Section(i),
                virtual_address: s.header.sh_addr,
                file_offset: s.header.sh_offset,
                size: s.content().len() as u64,
            });
        let segments = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_load())
            .map(|(i, s)| Mapping {
                region: Region::Segment(i),
                virtual_address: s.header.p_vaddr,
                file_offset: s.header.p_offset,
                size: s.header.p_filesz,
            });
        sections.chain(segments).collect()
    }

    fn region_bytes(&self, region: Region, delta: u64) -> Option<&[u8]> {
        match region {
            Region::Section(i) => self.sections.get(i)?.content().get(delta as usize..),
            Region::Segment(i) => {
                let ph = self.segments.get(i)?.header;
                let start = ph.p_offset.checked_add(delta)? as usize;
                let end = (ph.p_offset + ph.p_filesz) as usize;
                self.image.get(start..end)
            }
        }
    }

    fn write_region(&mut self, region: Region, delta: u64, bytes: &[u8]) {
        match region {
            Region::Section(i) => {
                let Some(section) = self.sections.get_mut(i) else {
                    return;
                };
                let start = delta as usize;
                section.content_mut()[start..start + bytes.len()].copy_from_slice(bytes);

                // Keep the background image in step within the original extent.
                let original_end = section.header.sh_offset + section.original_size();
                let offset = section.header.sh_offset + delta;
                if offset < original_end {
                    let n = bytes.len().min((original_end - offset) as usize);
                    let _ = self.image.write_slice_at(offset as usize, &bytes[..n]);
                }
            }
            Region::Segment(i) => {
                let Some(ph) = self.segments.get(i).map(|s| s.header) else {
                    return;
                };
                let offset = ph.p_offset + delta;
                let _ = self.image.write_slice_at(offset as usize, bytes);
                translate::write_through(&mut self.sections, offset, bytes);
            }
        }
    }
}

impl GenericBinary for ElfBinary {
    fn format(&self) -> Format {
        Format::ELF
    }

    fn header(&self) -> Header {
        Header {
            architecture: machine_arch(self.header.e_machine, self.header.class()),
            endianness: self.header.endian().into(),
            entrypoint: self.header.e_entry,
            object_type: self.object_type(),
            bits: self.header.class().bits(),
        }
    }

    fn entrypoint(&self) -> u64 {
        self.header.e_entry
    }

    fn is_pie(&self) -> bool {
        self.header.file_type() == ElfType::SharedObject && self.has_interpreter()
    }

    fn has_nx(&self) -> bool {
        segments::has_nx_stack(&self.segments)
    }

    fn sections(&self) -> Vec<&dyn Section> {
        self.sections.iter().map(|s| s as &dyn Section).collect()
    }

    fn sections_mut(&mut self) -> Vec<&mut dyn Section> {
        self.sections
            .iter_mut()
            .map(|s| s as &mut dyn Section)
            .collect()
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .map(|s| Symbol::new(s.name.clone(), s.st_value, s.st_size))
            .collect()
    }

    fn relocations(&self) -> Vec<Relocation> {
        self.relocations
            .iter()
            .map(|r| Relocation {
                address: r.r_offset,
                size: relocations::relocation_size(
                    self.header.e_machine,
                    self.header.class(),
                    r.r_type,
                ),
            })
            .collect()
    }

    fn segments(&self) -> Vec<Segment> {
        self.segments.iter().map(ElfSegment::to_segment).collect()
    }

    fn build_with(&self, config: &WriteConfig) -> crate::error::Result<Vec<u8>> {
        writer::build(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// ELF64 with one PT_LOAD at 0x400000 covering the first 0x200 bytes,
    /// `.text` at file 0x100 / vaddr 0x400100 and a 4-byte overlay.
    fn sample() -> Vec<u8> {
        let mut data = vec![0u8; 0x2c4];
        data[0..4].copy_from_slice(ELF_MAGIC);
        data[4] = 2;
        data[5] = 1;
        data[6] = 1;
        data[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        data[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        data[24..32].copy_from_slice(&0x400100u64.to_le_bytes());
        data[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        data[40..48].copy_from_slice(&0x200u64.to_le_bytes()); // e_shoff
        data[52..54].copy_from_slice(&64u16.to_le_bytes());
        data[54..56].copy_from_slice(&56u16.to_le_bytes());
        data[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum
        data[58..60].copy_from_slice(&64u16.to_le_bytes());
        data[60..62].copy_from_slice(&3u16.to_le_bytes());
        data[62..64].copy_from_slice(&2u16.to_le_bytes());

        // PT_LOAD
        data[64..68].copy_from_slice(&PT_LOAD.to_le_bytes());
        data[68..72].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
        data[80..88].copy_from_slice(&0x400000u64.to_le_bytes());
        data[88..96].copy_from_slice(&0x400000u64.to_le_bytes());
        data[96..104].copy_from_slice(&0x200u64.to_le_bytes());
        data[104..112].copy_from_slice(&0x200u64.to_le_bytes());

        data[0x100..0x110].copy_from_slice(&[0x90; 16]);
        let names = b"\0.text\0.shstrtab\0";
        data[0x180..0x180 + names.len()].copy_from_slice(names);

        let text = 0x240;
        data[text..text + 4].copy_from_slice(&1u32.to_le_bytes());
        data[text + 4..text + 8].copy_from_slice(&SHT_PROGBITS.to_le_bytes());
        data[text + 8..text + 16].copy_from_slice(&(SHF_ALLOC | SHF_EXECINSTR).to_le_bytes());
        data[text + 16..text + 24].copy_from_slice(&0x400100u64.to_le_bytes());
        data[text + 24..text + 32].copy_from_slice(&0x100u64.to_le_bytes());
        data[text + 32..text + 40].copy_from_slice(&0x10u64.to_le_bytes());
        data[text + 48..text + 56].copy_from_slice(&16u64.to_le_bytes());

        let strtab = 0x280;
        data[strtab..strtab + 4].copy_from_slice(&7u32.to_le_bytes());
        data[strtab + 4..strtab + 8].copy_from_slice(&SHT_STRTAB.to_le_bytes());
        data[strtab + 24..strtab + 32].copy_from_slice(&0x180u64.to_le_bytes());
        data[strtab + 32..strtab + 40].copy_from_slice(&(names.len() as u64).to_le_bytes());
        data[strtab + 48..strtab + 56].copy_from_slice(&1u64.to_le_bytes());

        data[0x2c0..0x2c4].copy_from_slice(b"OVLY");
        data
    }

    #[test]
    fn test_parse_sample() {
        let elf = ElfBinary::parse(&sample(), &ParseConfig::default()).unwrap();
        assert_eq!(elf.sections().len(), 3);
        assert_eq!(elf.segments().len(), 1);
        assert_eq!(elf.overlay(), b"OVLY");
        assert_eq!(elf.entrypoint(), 0x400100);
        // ET_DYN without PT_INTERP is a library, not a PIE executable.
        assert!(!elf.is_pie());
        assert!(!elf.has_nx());
        assert_eq!(elf.header().object_type, ObjectType::Library);
        assert_eq!(elf.sections_in_segment(0).len(), 2);
    }

    #[test]
    fn test_translation_prefers_sections() {
        let elf = ElfBinary::parse(&sample(), &ParseConfig::default()).unwrap();
        assert_eq!(elf.va_to_offset(0x400104).unwrap(), 0x104);
        // Covered only by the segment
        assert_eq!(elf.va_to_offset(0x400020).unwrap(), 0x20);
        assert_eq!(elf.offset_to_va(0x108), Some(0x400108));
        assert!(matches!(
            elf.va_to_offset(0x500000),
            Err(Error::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_segment_patch_writes_through() {
        let mut elf = ElfBinary::parse(&sample(), &ParseConfig::default()).unwrap();
        // Straddles the header area and the start of .text via the segment.
        elf.patch_address(0x4000fe, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&elf.get_section(".text").unwrap().content()[..2], &[3, 4]);
        assert_eq!(elf.content_at(0x400100, 2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_overlay_roundtrip() {
        let data = sample();
        let mut elf = ElfBinary::parse(&data, &ParseConfig::default()).unwrap();
        assert_eq!(elf.build().unwrap(), data);

        elf.set_overlay(Vec::new());
        assert_eq!(elf.build().unwrap(), &data[..0x2c0]);
    }
}
