//! LC_SYMTAB symbol table parsing

use crate::formats::bytes::{cstring_lossy_at, Endian, ReadExt};
use crate::formats::macho::commands::RawCommand;
use crate::formats::macho::types::*;

/// Decode the nlist entries an LC_SYMTAB command points at.
pub fn parse_symtab(
    data: &[u8],
    symtab: &RawCommand,
    endian: Endian,
    is_64: bool,
    max_symbols: usize,
) -> Result<Vec<Nlist>> {
    let field = |offset: usize| {
        symtab
            .u32_at(offset, endian)
            .ok_or(MachOError::MalformedLoadCommand {
                index: 0,
                reason: "truncated LC_SYMTAB".to_string(),
            })
    };
    let symoff = field(8)? as usize;
    let nsyms = field(12)? as usize;
    let stroff = field(16)? as usize;
    let strsize = field(20)? as usize;
    if nsyms > max_symbols {
        return Err(MachOError::LimitExceeded("symbol count"));
    }

    let entry_size = if is_64 { 16 } else { 12 };
    let table = data
        .read_slice_at(symoff, nsyms * entry_size)
        .ok_or(MachOError::Truncated {
            offset: symoff,
            needed: nsyms * entry_size,
        })?;
    let strings = data.read_slice_at(stroff, strsize).unwrap_or(&[]);

    let mut symbols = Vec::with_capacity(nsyms);
    for i in 0..nsyms {
        let raw = &table[i * entry_size..(i + 1) * entry_size];
        let truncated = MachOError::Truncated {
            offset: symoff + i * entry_size,
            needed: entry_size,
        };
        let strx = raw.read_u32_at(0, endian).ok_or(truncated.clone())? as usize;
        let n_value = if is_64 {
            raw.read_u64_at(8, endian)
        } else {
            raw.read_u32_at(8, endian).map(u64::from)
        }
        .ok_or(truncated.clone())?;
        symbols.push(Nlist {
            name: cstring_lossy_at(strings, strx).unwrap_or_default(),
            n_type: raw.read_u8_at(4).ok_or(truncated.clone())?,
            n_sect: raw.read_u8_at(5).ok_or(truncated.clone())?,
            n_desc: raw.read_u16_at(6, endian).ok_or(truncated)?,
            n_value,
        });
    }

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::bytes::ByteSink;

    #[test]
    fn test_parse_nlist64() {
        let mut data = vec![0u8; 0x100];
        let mut sink = ByteSink::new(Endian::Little);
        sink.u32(1).u8(N_SECT | N_EXT).u8(1).u16(0).u64(0x1_0000_0f00);
        sink.u32(7).u8(N_UNDF | N_EXT).u8(0).u16(0x100).u64(0);
        let table = sink.into_inner();
        data[0x40..0x40 + table.len()].copy_from_slice(&table);
        let strings = b"\0_main\0_printf\0";
        data[0x80..0x80 + strings.len()].copy_from_slice(strings);

        let mut cmd = ByteSink::new(Endian::Little);
        cmd.u32(LC_SYMTAB)
            .u32(24)
            .u32(0x40)
            .u32(2)
            .u32(0x80)
            .u32(strings.len() as u32);
        let symtab = RawCommand {
            cmd: LC_SYMTAB,
            data: cmd.into_inner(),
        };

        let symbols = parse_symtab(&data, &symtab, Endian::Little, true, 10).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "_main");
        assert_eq!(symbols[0].n_value, 0x1_0000_0f00);
        assert!(symbols[0].is_external());
        assert_eq!(symbols[1].name, "_printf");
        assert!(symbols[1].is_undefined());

        assert!(matches!(
            parse_symtab(&data, &symtab, Endian::Little, true, 1),
            Err(MachOError::LimitExceeded(_))
        ));
    }
}
