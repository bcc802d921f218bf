//! Relocation processing

use crate::core::section::Section;
use crate::formats::bytes::{Endian, ReadExt};
use crate::formats::elf::sections::ElfSection;
use crate::formats::elf::types::*;

/// Decode every SHT_REL and SHT_RELA section in table order.
pub fn parse_relocations(
    sections: &[ElfSection],
    class: ElfClass,
    endian: Endian,
    limit: usize,
) -> Result<Vec<ElfRelocation>> {
    let mut relocations = Vec::new();
    for (index, section) in sections.iter().enumerate() {
        let is_rela = match section.section_type() {
            SHT_RELA => true,
            SHT_REL => false,
            _ => continue,
        };
        let entry_size = match (class, is_rela) {
            (ElfClass::Elf32, false) => 8,  // Elf32_Rel
            (ElfClass::Elf32, true) => 12,  // Elf32_Rela
            (ElfClass::Elf64, false) => 16, // Elf64_Rel
            (ElfClass::Elf64, true) => 24,  // Elf64_Rela
        };

        let data = section.content();
        let mut offset = 0;
        while offset + entry_size <= data.len() {
            relocations.push(parse_relocation(&data[offset..], class, endian, is_rela, index)?);
            offset += entry_size;
        }
        if relocations.len() > limit {
            return Err(ElfError::LimitExceeded("relocation count"));
        }
    }
    Ok(relocations)
}

/// Parse a single relocation entry
fn parse_relocation(
    data: &[u8],
    class: ElfClass,
    endian: Endian,
    is_rela: bool,
    section: usize,
) -> Result<ElfRelocation> {
    let bad = |needed| ElfError::Truncated { offset: 0, needed };
    match class {
        ElfClass::Elf32 => {
            let r_offset = data.read_u32_at(0, endian).ok_or(bad(8))? as u64;
            let r_info = data.read_u32_at(4, endian).ok_or(bad(8))?;
            let r_addend = if is_rela {
                Some(data.read_i32_at(8, endian).ok_or(bad(12))? as i64)
            } else {
                None
            };
            Ok(ElfRelocation {
                r_offset,
                r_type: r_info & 0xff,
                r_sym: r_info >> 8,
                r_addend,
                section,
            })
        }
        ElfClass::Elf64 => {
            let r_offset = data.read_u64_at(0, endian).ok_or(bad(16))?;
            let r_info = data.read_u64_at(8, endian).ok_or(bad(16))?;
            let r_addend = if is_rela {
                Some(data.read_u64_at(16, endian).ok_or(bad(24))? as i64)
            } else {
                None
            };
            Ok(ElfRelocation {
                r_offset,
                r_type: (r_info & 0xffff_ffff) as u32,
                r_sym: (r_info >> 32) as u32,
                r_addend,
                section,
            })
        }
    }
}

/// Width in bits of the field a relocation patches.
pub fn relocation_size(machine: u16, class: ElfClass, r_type: u32) -> u32 {
    match machine {
        EM_X86_64 => match r_type {
            0 => 0,
            1 | 6 | 7 | 8 | 16 | 17 | 18 | 24 | 25 | 33 | 37 => 64,
            12 | 13 => 16,
            14 | 15 => 8,
            _ => 32,
        },
        EM_386 => match r_type {
            0 => 0,
            20 | 21 => 16,
            22 | 23 => 8,
            _ => 32,
        },
        EM_AARCH64 => match r_type {
            0 => 0,
            257 | 260 => 64,
            259 | 262 => 16,
            258 | 261 | 263..=1023 => 32,
            _ => 64,
        },
        EM_ARM => match r_type {
            0 => 0,
            5 => 16,
            8 => 8,
            _ => 32,
        },
        _ => class.bits() as u32,
    }
}
