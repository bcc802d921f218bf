//! Import table parsing

use crate::formats::bytes::{cstring_lossy_at, Endian, ReadExt};
use crate::formats::pe::sections::{rva_to_offset, PeSection};
use crate::formats::pe::types::*;

const LE: Endian = Endian::Little;

/// Parse every import descriptor into flat entries, one per IAT slot.
pub fn parse_imports(
    data: &[u8],
    sections: &[PeSection],
    import_dir: &DataDirectory,
    is_64bit: bool,
    max_imports: usize,
) -> Result<Vec<ImportEntry>> {
    let mut entries = Vec::new();
    if import_dir.virtual_address == 0 || import_dir.size == 0 {
        return Ok(entries);
    }

    let mut offset = rva_to_offset(sections, import_dir.virtual_address).ok_or(
        PeError::InvalidRva {
            rva: import_dir.virtual_address,
        },
    )?;

    loop {
        let Some(desc) = data.read_slice_at(offset, 20) else {
            break;
        };
        // Terminator (all zeros)
        if desc.iter().all(|&b| b == 0) {
            break;
        }

        let field = |off: usize| desc.read_u32_at(off, LE).ok_or(PeError::MalformedImportTable);
        let original_first_thunk = field(0)?;
        let name_rva = field(12)?;
        let first_thunk = field(16)?;
        offset += 20;

        if name_rva == 0 {
            continue;
        }
        let dll = rva_to_offset(sections, name_rva)
            .and_then(|off| cstring_lossy_at(data, off))
            .ok_or(PeError::InvalidRva { rva: name_rva })?;

        parse_thunks(
            data,
            sections,
            &dll,
            original_first_thunk,
            first_thunk,
            is_64bit,
            max_imports,
            &mut entries,
        )?;
    }

    Ok(entries)
}

#[allow(clippy::too_many_arguments)]
fn parse_thunks(
    data: &[u8],
    sections: &[PeSection],
    dll: &str,
    original_first_thunk: u32,
    first_thunk: u32,
    is_64bit: bool,
    max_imports: usize,
    entries: &mut Vec<ImportEntry>,
) -> Result<()> {
    // Use original first thunk if available, otherwise first thunk
    let thunk_rva = if original_first_thunk != 0 {
        original_first_thunk
    } else {
        first_thunk
    };
    if thunk_rva == 0 {
        return Ok(());
    }

    let mut thunk_offset =
        rva_to_offset(sections, thunk_rva).ok_or(PeError::InvalidRva { rva: thunk_rva })?;
    let entry_size = if is_64bit { 8 } else { 4 };
    let mut index = 0u32;

    loop {
        let val = if is_64bit {
            data.read_u64_at(thunk_offset, LE)
        } else {
            data.read_u32_at(thunk_offset, LE).map(u64::from)
        };
        let Some(val) = val.filter(|&v| v != 0) else {
            break;
        };
        if entries.len() >= max_imports {
            return Err(PeError::LimitExceeded("import count"));
        }

        let ordinal_flag = if is_64bit { 1u64 << 63 } else { 1u64 << 31 };
        let (name, ordinal, hint) = if val & ordinal_flag != 0 {
            (None, Some((val & 0xFFFF) as u16), None)
        } else {
            let hint_name_rva = (val & 0x7FFFFFFF) as u32;
            match rva_to_offset(sections, hint_name_rva) {
                Some(off) => (
                    cstring_lossy_at(data, off + 2),
                    None,
                    data.read_u16_at(off, LE),
                ),
                None => (None, None, None),
            }
        };

        entries.push(ImportEntry {
            dll: dll.to_string(),
            name,
            ordinal,
            hint,
            iat_rva: first_thunk + index * entry_size as u32,
        });

        thunk_offset += entry_size;
        index += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pe::directories::tests::{image, put_cstr, put_u16, put_u32};

    #[test]
    fn test_parse_imports_pe32() {
        let (mut data, sections) = image();
        // Descriptor at RVA 0x1000
        put_u32(&mut data, 0x200, 0x1040); // OriginalFirstThunk
        put_u32(&mut data, 0x200 + 12, 0x1100); // Name
        put_u32(&mut data, 0x200 + 16, 0x1080); // FirstThunk
        // ILT: one by name, one by ordinal
        put_u32(&mut data, 0x240, 0x1120);
        put_u32(&mut data, 0x244, 0x8000_0007);
        put_cstr(&mut data, 0x300, "KERNEL32.dll");
        put_u16(&mut data, 0x320, 42);
        put_cstr(&mut data, 0x322, "ExitProcess");

        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 40,
        };
        let imports = parse_imports(&data, &sections, &dir, false, 100).unwrap();
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].dll, "KERNEL32.dll");
        assert_eq!(imports[0].name.as_deref(), Some("ExitProcess"));
        assert_eq!(imports[0].hint, Some(42));
        assert_eq!(imports[0].iat_rva, 0x1080);
        assert_eq!(imports[1].ordinal, Some(7));
        assert_eq!(imports[1].iat_rva, 0x1084);
    }

    #[test]
    fn test_import_limit() {
        let (mut data, sections) = image();
        put_u32(&mut data, 0x200, 0x1040);
        put_u32(&mut data, 0x200 + 12, 0x1100);
        put_u32(&mut data, 0x200 + 16, 0x1080);
        put_u32(&mut data, 0x240, 0x8000_0001);
        put_u32(&mut data, 0x244, 0x8000_0002);
        put_cstr(&mut data, 0x300, "a.dll");

        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 40,
        };
        assert!(matches!(
            parse_imports(&data, &sections, &dir, false, 1),
            Err(PeError::LimitExceeded(_))
        ));
    }
}
