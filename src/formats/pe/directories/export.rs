//! Export table parsing

use std::collections::HashMap;

use crate::formats::bytes::{cstring_lossy_at, Endian, ReadExt};
use crate::formats::pe::sections::{rva_to_offset, PeSection};
use crate::formats::pe::types::*;

/// Export table containing all exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    pub dll_name: Option<String>,
    pub ordinal_base: u32,
    pub exports: Vec<ExportEntry>,
}

impl ExportTable {
    /// Get export by name
    pub fn get_by_name(&self, name: &str) -> Option<&ExportEntry> {
        self.exports.iter().find(|e| e.name.as_deref() == Some(name))
    }

    /// Get export by ordinal
    pub fn get_by_ordinal(&self, ordinal: u32) -> Option<&ExportEntry> {
        self.exports.iter().find(|e| e.ordinal == ordinal)
    }

    /// Count of exports
    pub fn count(&self) -> usize {
        self.exports.len()
    }
}

fn read_string(data: &[u8], sections: &[PeSection], rva: u32) -> Result<String> {
    let offset = rva_to_offset(sections, rva).ok_or(PeError::InvalidRva { rva })?;
    cstring_lossy_at(data, offset).ok_or(PeError::InvalidOffset { offset })
}

/// Parse export table from PE data
pub fn parse_exports(
    data: &[u8],
    sections: &[PeSection],
    export_dir: &DataDirectory,
    max_exports: usize,
) -> Result<ExportTable> {
    if export_dir.virtual_address == 0 || export_dir.size == 0 {
        return Ok(ExportTable::default());
    }

    let dir_offset = rva_to_offset(sections, export_dir.virtual_address).ok_or(
        PeError::InvalidRva {
            rva: export_dir.virtual_address,
        },
    )?;
    let dir = data
        .read_slice_at(dir_offset, 40)
        .ok_or(PeError::MalformedExportTable)?;
    let field = |off: usize| {
        dir.read_u32_at(off, Endian::Little)
            .ok_or(PeError::MalformedExportTable)
    };

    let name_rva = field(12)?;
    let ordinal_base = field(16)?;
    let number_of_functions = field(20)? as usize;
    let number_of_names = field(24)? as usize;
    let address_table_rva = field(28)?;
    let name_table_rva = field(32)?;
    let ordinal_table_rva = field(36)?;

    if number_of_functions > max_exports || number_of_names > max_exports {
        return Err(PeError::LimitExceeded("export count"));
    }

    let dll_name = if name_rva != 0 {
        read_string(data, sections, name_rva).ok()
    } else {
        None
    };

    let addr_offset = rva_to_offset(sections, address_table_rva).ok_or(PeError::InvalidRva {
        rva: address_table_rva,
    })?;
    let mut addresses = Vec::with_capacity(number_of_functions);
    for i in 0..number_of_functions {
        let offset = addr_offset + i * 4;
        let Some(rva) = data.read_u32_at(offset, Endian::Little) else {
            break;
        };
        addresses.push(rva);
    }

    // Name and ordinal tables are parallel arrays indexed by name number.
    let mut name_map = HashMap::new();
    if number_of_names > 0 && name_table_rva != 0 && ordinal_table_rva != 0 {
        let name_offset = rva_to_offset(sections, name_table_rva)
            .ok_or(PeError::InvalidRva { rva: name_table_rva })?;
        let ord_offset = rva_to_offset(sections, ordinal_table_rva).ok_or(PeError::InvalidRva {
            rva: ordinal_table_rva,
        })?;

        for i in 0..number_of_names {
            let (Some(rva), Some(index)) = (
                data.read_u32_at(name_offset + i * 4, Endian::Little),
                data.read_u16_at(ord_offset + i * 2, Endian::Little),
            ) else {
                break;
            };
            if rva != 0 {
                if let Ok(name) = read_string(data, sections, rva) {
                    name_map.insert(index as usize, name);
                }
            }
        }
    }

    let dir_end = export_dir.virtual_address.saturating_add(export_dir.size);
    let mut exports = Vec::new();
    for (i, &rva) in addresses.iter().enumerate() {
        if rva == 0 {
            continue; // Unused slot
        }

        // An RVA inside the export directory names a forwarder string.
        let forwarder = if rva >= export_dir.virtual_address && rva < dir_end {
            read_string(data, sections, rva).ok()
        } else {
            None
        };

        exports.push(ExportEntry {
            name: name_map.remove(&i),
            ordinal: ordinal_base + i as u32,
            rva,
            forwarder,
        });
    }

    Ok(ExportTable {
        dll_name,
        ordinal_base,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pe::directories::tests::{image, put_cstr, put_u16, put_u32};

    #[test]
    fn test_parse_exports() {
        // Section maps RVA 0x1000 to file offset 0x200.
        let (mut data, sections) = image();
        let dir = 0x200;
        put_u32(&mut data, dir + 12, 0x1100); // dll name
        put_u32(&mut data, dir + 16, 1); // ordinal base
        put_u32(&mut data, dir + 20, 2); // functions
        put_u32(&mut data, dir + 24, 1); // names
        put_u32(&mut data, dir + 28, 0x1040);
        put_u32(&mut data, dir + 32, 0x1060);
        put_u32(&mut data, dir + 36, 0x1080);
        put_u32(&mut data, 0x240, 0x2010);
        put_u32(&mut data, 0x244, 0x2020);
        put_u32(&mut data, 0x260, 0x1110);
        put_u16(&mut data, 0x280, 1);
        put_cstr(&mut data, 0x300, "demo.dll");
        put_cstr(&mut data, 0x310, "Run");

        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };
        let table = parse_exports(&data, &sections, &dir, 100).unwrap();
        assert_eq!(table.dll_name.as_deref(), Some("demo.dll"));
        assert_eq!(table.count(), 2);
        assert!(table.get_by_ordinal(1).unwrap().name.is_none());
        let run = table.get_by_name("Run").unwrap();
        assert_eq!(run.ordinal, 2);
        assert_eq!(run.rva, 0x2020);
        assert!(run.forwarder.is_none());
    }

    #[test]
    fn test_empty_directory() {
        let (data, sections) = image();
        let table = parse_exports(&data, &sections, &DataDirectory::default(), 10).unwrap();
        assert_eq!(table.count(), 0);
    }
}
