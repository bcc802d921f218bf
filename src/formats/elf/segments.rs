//! Program header table management

use crate::core::segment::Segment;
use crate::formats::bytes::{ByteSink, Endian, ReadExt};
use crate::formats::elf::types::*;

/// One program header, kept in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSegment {
    pub header: ProgramHeader,
}

impl ElfSegment {
    pub fn segment_type(&self) -> u32 {
        self.header.p_type
    }

    pub fn type_name(&self) -> &'static str {
        match self.header.p_type {
            PT_NULL => "NULL",
            PT_LOAD => "LOAD",
            PT_DYNAMIC => "DYNAMIC",
            PT_INTERP => "INTERP",
            PT_NOTE => "NOTE",
            PT_SHLIB => "SHLIB",
            PT_PHDR => "PHDR",
            PT_TLS => "TLS",
            PT_GNU_EH_FRAME => "GNU_EH_FRAME",
            PT_GNU_STACK => "GNU_STACK",
            PT_GNU_RELRO => "GNU_RELRO",
            PT_GNU_PROPERTY => "GNU_PROPERTY",
            _ => "UNKNOWN",
        }
    }

    pub fn is_load(&self) -> bool {
        self.header.p_type == PT_LOAD
    }

    pub fn is_executable(&self) -> bool {
        (self.header.p_flags & PF_X) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.header.p_flags & PF_W) != 0
    }

    pub fn is_readable(&self) -> bool {
        (self.header.p_flags & PF_R) != 0
    }

    pub fn contains_vaddr(&self, addr: u64) -> bool {
        addr >= self.header.p_vaddr && addr - self.header.p_vaddr < self.header.p_memsz
    }

    /// Generic view of this program header.
    pub fn to_segment(&self) -> Segment {
        Segment {
            name: self.type_name().to_string(),
            virtual_address: self.header.p_vaddr,
            virtual_size: self.header.p_memsz,
            file_offset: self.header.p_offset,
            file_size: self.header.p_filesz,
        }
    }
}

/// Parse program headers in table order, bounds-checking each file range.
pub fn parse_segments(data: &[u8], header: &ElfHeader) -> Result<Vec<ElfSegment>> {
    let ph_offset = header.e_phoff as usize;
    let ph_entsize = header.e_phentsize as usize;
    let ph_num = header.e_phnum as usize;

    if ph_num == 0 || ph_offset == 0 {
        return Ok(Vec::new());
    }

    let total_size = ph_num * ph_entsize;
    if ph_offset.checked_add(total_size).map_or(true, |end| end > data.len()) {
        return Err(ElfError::Truncated {
            offset: ph_offset,
            needed: total_size,
        });
    }

    let mut segments = Vec::with_capacity(ph_num);
    for index in 0..ph_num {
        let offset = ph_offset + index * ph_entsize;
        let ph = parse_program_header(data, offset, header.class(), header.endian())?;
        let end = ph.p_offset.checked_add(ph.p_filesz);
        if end.map_or(true, |end| end > data.len() as u64) {
            return Err(ElfError::SegmentOutOfBounds {
                index,
                offset: ph.p_offset,
                size: ph.p_filesz,
            });
        }
        segments.push(ElfSegment { header: ph });
    }

    Ok(segments)
}

fn parse_program_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: Endian,
) -> Result<ProgramHeader> {
    let needed = class.phdr_size();
    let entry = data
        .read_slice_at(offset, needed)
        .ok_or(ElfError::Truncated { offset, needed })?;
    let bad = || ElfError::Truncated { offset, needed };

    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: entry.read_u32_at(0, endian).ok_or_else(bad)?,
            p_offset: entry.read_u32_at(4, endian).ok_or_else(bad)? as u64,
            p_vaddr: entry.read_u32_at(8, endian).ok_or_else(bad)? as u64,
            p_paddr: entry.read_u32_at(12, endian).ok_or_else(bad)? as u64,
            p_filesz: entry.read_u32_at(16, endian).ok_or_else(bad)? as u64,
            p_memsz: entry.read_u32_at(20, endian).ok_or_else(bad)? as u64,
            p_flags: entry.read_u32_at(24, endian).ok_or_else(bad)?,
            p_align: entry.read_u32_at(28, endian).ok_or_else(bad)? as u64,
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: entry.read_u32_at(0, endian).ok_or_else(bad)?,
            p_flags: entry.read_u32_at(4, endian).ok_or_else(bad)?,
            p_offset: entry.read_u64_at(8, endian).ok_or_else(bad)?,
            p_vaddr: entry.read_u64_at(16, endian).ok_or_else(bad)?,
            p_paddr: entry.read_u64_at(24, endian).ok_or_else(bad)?,
            p_filesz: entry.read_u64_at(32, endian).ok_or_else(bad)?,
            p_memsz: entry.read_u64_at(40, endian).ok_or_else(bad)?,
            p_align: entry.read_u64_at(48, endian).ok_or_else(bad)?,
        }),
    }
}

/// Append one encoded program header to `sink`.
pub fn encode_program_header(sink: &mut ByteSink, ph: &ProgramHeader, class: ElfClass) {
    match class {
        ElfClass::Elf32 => {
            sink.u32(ph.p_type)
                .u32(ph.p_offset as u32)
                .u32(ph.p_vaddr as u32)
                .u32(ph.p_paddr as u32)
                .u32(ph.p_filesz as u32)
                .u32(ph.p_memsz as u32)
                .u32(ph.p_flags)
                .u32(ph.p_align as u32);
        }
        ElfClass::Elf64 => {
            sink.u32(ph.p_type)
                .u32(ph.p_flags)
                .u64(ph.p_offset)
                .u64(ph.p_vaddr)
                .u64(ph.p_paddr)
                .u64(ph.p_filesz)
                .u64(ph.p_memsz)
                .u64(ph.p_align);
        }
    }
}

/// Check for PT_GNU_STACK (NX bit)
pub fn has_nx_stack(segments: &[ElfSegment]) -> bool {
    segments
        .iter()
        .find(|s| s.header.p_type == PT_GNU_STACK)
        .map(|s| !s.is_executable()) // NX when not executable
        .unwrap_or(false)
}

/// Get interpreter path
pub fn interpreter(segments: &[ElfSegment], data: &[u8]) -> Option<String> {
    let ph = segments.iter().find(|s| s.header.p_type == PT_INTERP)?.header;
    let bytes = data.read_slice_at(ph.p_offset as usize, ph.p_filesz as usize)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vaddr: u64, offset: u64, filesz: u64, flags: u32) -> ElfSegment {
        ElfSegment {
            header: ProgramHeader {
                p_type: PT_LOAD,
                p_flags: flags,
                p_offset: offset,
                p_vaddr: vaddr,
                p_paddr: vaddr,
                p_filesz: filesz,
                p_memsz: filesz,
                p_align: 0x1000,
            },
        }
    }

    #[test]
    fn test_nx_stack() {
        let mut stack = load(0, 0, 0, PF_R | PF_W);
        stack.header.p_type = PT_GNU_STACK;
        assert!(has_nx_stack(&[load(0, 0, 0x100, PF_R | PF_X), stack]));

        stack.header.p_flags |= PF_X;
        assert!(!has_nx_stack(&[stack]));
        assert!(!has_nx_stack(&[]));
    }

    #[test]
    fn test_encode_roundtrip_32() {
        let seg = load(0x8048000, 0, 0x200, PF_R | PF_X);
        let mut sink = ByteSink::new(Endian::Big);
        encode_program_header(&mut sink, &seg.header, ElfClass::Elf32);
        let bytes = sink.into_inner();
        assert_eq!(bytes.len(), 32);
        let parsed = parse_program_header(&bytes, 0, ElfClass::Elf32, Endian::Big).unwrap();
        assert_eq!(parsed, seg.header);
    }

    #[test]
    fn test_generic_view() {
        let seg = load(0x400000, 0, 0x1000, PF_R | PF_X);
        let view = seg.to_segment();
        assert_eq!(view.name, "LOAD");
        assert!(view.contains_address(0x400fff));
        assert!(seg.contains_vaddr(0x400000));
        assert!(!seg.contains_vaddr(0x401000));
    }
}
