//! Base relocation table parsing

use crate::formats::bytes::{Endian, ReadExt};
use crate::formats::pe::sections::{rva_to_offset, PeSection};
use crate::formats::pe::types::*;

/// Walk the relocation blocks. ABSOLUTE entries are padding and are dropped.
pub fn parse_base_relocations(
    data: &[u8],
    sections: &[PeSection],
    dir: &DataDirectory,
    max_relocations: usize,
) -> Result<Vec<BaseRelocation>> {
    let mut relocations = Vec::new();
    if dir.virtual_address == 0 || dir.size == 0 {
        return Ok(relocations);
    }

    let start = rva_to_offset(sections, dir.virtual_address).ok_or(PeError::InvalidRva {
        rva: dir.virtual_address,
    })?;
    let table = data
        .read_slice_at(start, dir.size as usize)
        .ok_or(PeError::InvalidOffset { offset: start })?;

    let mut offset = 0;
    while offset + 8 <= table.len() {
        let (Some(page_rva), Some(block_size)) = (
            table.read_u32_at(offset, Endian::Little),
            table.read_u32_at(offset + 4, Endian::Little),
        ) else {
            break;
        };
        let block_size = block_size as usize;
        if block_size < 8 {
            break;
        }

        let entries = (block_size - 8) / 2;
        for i in 0..entries {
            let Some(entry) = table.read_u16_at(offset + 8 + i * 2, Endian::Little) else {
                break;
            };
            let kind = (entry >> 12) as u8;
            if kind == IMAGE_REL_BASED_ABSOLUTE {
                continue;
            }
            if relocations.len() >= max_relocations {
                return Err(PeError::LimitExceeded("base relocation count"));
            }
            relocations.push(BaseRelocation {
                rva: page_rva + (entry & 0x0fff) as u32,
                kind,
            });
        }
        offset += block_size;
    }

    Ok(relocations)
}
