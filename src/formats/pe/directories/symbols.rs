//! COFF symbol table parsing

use crate::formats::bytes::{cstring_lossy_at, fixed_name, Endian, ReadExt};
use crate::formats::pe::types::*;

const SYMBOL_SIZE: usize = 18;

/// Read the COFF symbol table the file header points at, if any.
pub fn parse_coff_symbols(
    data: &[u8],
    coff: &CoffHeader,
    max_symbols: usize,
) -> Result<Vec<CoffSymbol>> {
    let mut symbols = Vec::new();
    let table_offset = coff.pointer_to_symbol_table as usize;
    let count = coff.number_of_symbols as usize;
    if table_offset == 0 || count == 0 {
        return Ok(symbols);
    }
    if count > max_symbols {
        return Err(PeError::LimitExceeded("COFF symbol count"));
    }

    let table_size = count * SYMBOL_SIZE;
    let table = data
        .read_slice_at(table_offset, table_size)
        .ok_or(PeError::InvalidOffset {
            offset: table_offset,
        })?;
    // The string table follows the symbols directly.
    let strings = data.get(table_offset + table_size..).unwrap_or(&[]);

    let mut index = 0;
    while index < count {
        let offset = index * SYMBOL_SIZE;
        let raw = &table[offset..offset + SYMBOL_SIZE];
        let le = Endian::Little;
        let bad = || PeError::InvalidOffset {
            offset: table_offset + offset,
        };

        // Long names: four zero bytes then an offset into the string table.
        let name = if raw[0..4] == [0, 0, 0, 0] {
            let str_offset = raw.read_u32_at(4, le).ok_or_else(bad)? as usize;
            cstring_lossy_at(strings, str_offset).unwrap_or_default()
        } else {
            fixed_name(&raw[0..8])
        };

        let aux = raw.read_u8_at(17).ok_or_else(bad)? as usize;
        symbols.push(CoffSymbol {
            name,
            value: raw.read_u32_at(8, le).ok_or_else(bad)?,
            section_number: raw.read_u16_at(12, le).ok_or_else(bad)? as i16,
            symbol_type: raw.read_u16_at(14, le).ok_or_else(bad)?,
            storage_class: raw.read_u8_at(16).ok_or_else(bad)?,
        });
        index += 1 + aux;
    }

    Ok(symbols)
}
