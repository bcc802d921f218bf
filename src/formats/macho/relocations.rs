//! Section relocation parsing

use crate::formats::bytes::{Endian, ReadExt};
use crate::formats::macho::types::*;

const R_SCATTERED: u32 = 0x8000_0000;

/// Decode `nreloc` entries at `reloff`.
///
/// The bitfield layout of `r_info` follows the file's byte order.
pub fn parse_relocations(
    data: &[u8],
    reloff: u32,
    nreloc: u32,
    endian: Endian,
) -> Result<Vec<MachRelocation>> {
    let start = reloff as usize;
    let count = nreloc as usize;
    let table = data
        .read_slice_at(start, count * 8)
        .ok_or(MachOError::Truncated {
            offset: start,
            needed: count * 8,
        })?;

    let mut relocations = Vec::with_capacity(count);
    for i in 0..count {
        let (Some(word0), Some(word1)) = (
            table.read_u32_at(i * 8, endian),
            table.read_u32_at(i * 8 + 4, endian),
        ) else {
            break;
        };

        let relocation = if word0 & R_SCATTERED != 0 {
            MachRelocation {
                address: word0 & 0x00ff_ffff,
                symbolnum: 0,
                pcrel: (word0 >> 30) & 1 != 0,
                length: ((word0 >> 28) & 3) as u8,
                is_extern: false,
                kind: ((word0 >> 24) & 0xf) as u8,
                scattered: true,
            }
        } else if endian == Endian::Little {
            MachRelocation {
                address: word0,
                symbolnum: word1 & 0x00ff_ffff,
                pcrel: (word1 >> 24) & 1 != 0,
                length: ((word1 >> 25) & 3) as u8,
                is_extern: (word1 >> 27) & 1 != 0,
                kind: (word1 >> 28) as u8,
                scattered: false,
            }
        } else {
            MachRelocation {
                address: word0,
                symbolnum: word1 >> 8,
                pcrel: (word1 >> 7) & 1 != 0,
                length: ((word1 >> 5) & 3) as u8,
                is_extern: (word1 >> 4) & 1 != 0,
                kind: (word1 & 0xf) as u8,
                scattered: false,
            }
        };
        relocations.push(relocation);
    }

    Ok(relocations)
}
