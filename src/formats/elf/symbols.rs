//! Symbol table parsing

use crate::formats::bytes::{cstring_lossy_at, Endian, ReadExt};
use crate::formats::elf::sections::ElfSection;
use crate::formats::elf::types::*;
use crate::core::section::Section;

/// Symbol binding
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol types
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;

/// Decode `.dynsym` then `.symtab`, stopping once `limit` entries were read.
pub fn parse_symbols(
    sections: &[ElfSection],
    class: ElfClass,
    endian: Endian,
    limit: usize,
) -> Result<Vec<ElfSymbol>> {
    let mut symbols = Vec::new();
    for sh_type in [SHT_DYNSYM, SHT_SYMTAB] {
        for table in sections.iter().filter(|s| s.section_type() == sh_type) {
            let strings = sections
                .get(table.header.sh_link as usize)
                .map(|s| s.content())
                .unwrap_or(&[]);
            parse_table(
                table.content(),
                strings,
                class,
                endian,
                sh_type == SHT_DYNSYM,
                &mut symbols,
            )?;
            if symbols.len() > limit {
                return Err(ElfError::LimitExceeded("symbol count"));
            }
        }
    }
    Ok(symbols)
}

fn parse_table(
    data: &[u8],
    strings: &[u8],
    class: ElfClass,
    endian: Endian,
    dynamic: bool,
    out: &mut Vec<ElfSymbol>,
) -> Result<()> {
    let entry_size = match class {
        ElfClass::Elf32 => 16,
        ElfClass::Elf64 => 24,
    };

    let mut offset = 0;
    while offset + entry_size <= data.len() {
        out.push(parse_symbol(&data[offset..], strings, class, endian, dynamic)?);
        offset += entry_size;
    }
    Ok(())
}

/// Parse a single symbol entry
fn parse_symbol(
    data: &[u8],
    strings: &[u8],
    class: ElfClass,
    endian: Endian,
    dynamic: bool,
) -> Result<ElfSymbol> {
    let bad = |needed| ElfError::Truncated { offset: 0, needed };
    let (st_name, st_value, st_size, st_info, st_other, st_shndx) = match class {
        ElfClass::Elf32 => (
            data.read_u32_at(0, endian).ok_or(bad(16))?,
            data.read_u32_at(4, endian).ok_or(bad(16))? as u64,
            data.read_u32_at(8, endian).ok_or(bad(16))? as u64,
            data.read_u8_at(12).ok_or(bad(16))?,
            data.read_u8_at(13).ok_or(bad(16))?,
            data.read_u16_at(14, endian).ok_or(bad(16))?,
        ),
        ElfClass::Elf64 => (
            data.read_u32_at(0, endian).ok_or(bad(24))?,
            data.read_u64_at(8, endian).ok_or(bad(24))?,
            data.read_u64_at(16, endian).ok_or(bad(24))?,
            data.read_u8_at(4).ok_or(bad(24))?,
            data.read_u8_at(5).ok_or(bad(24))?,
            data.read_u16_at(6, endian).ok_or(bad(24))?,
        ),
    };

    Ok(ElfSymbol {
        name: cstring_lossy_at(strings, st_name as usize).unwrap_or_default(),
        st_value,
        st_size,
        st_info,
        st_other,
        st_shndx,
        dynamic,
    })
}
