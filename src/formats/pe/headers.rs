//! PE header parsing and encoding

use crate::formats::bytes::{ByteSink, Endian, ReadExt};
use crate::formats::pe::types::*;

const LE: Endian = Endian::Little;

fn truncated(expected: usize, actual: usize) -> PeError {
    PeError::TruncatedHeader { expected, actual }
}

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    if data.len() < 64 {
        return Err(truncated(64, data.len()));
    }

    let e_magic = data.read_u16_at(0, LE).ok_or(truncated(2, data.len()))?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    Ok(DosHeader {
        e_magic,
        e_lfanew: data.read_u32_at(60, LE).ok_or(truncated(64, data.len()))?,
    })
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    let raw = data
        .read_slice_at(offset, 20)
        .ok_or(truncated(offset + 20, data.len()))?;
    let bad = || truncated(offset + 20, data.len());

    Ok(CoffHeader {
        machine: raw.read_u16_at(0, LE).ok_or_else(bad)?,
        number_of_sections: raw.read_u16_at(2, LE).ok_or_else(bad)?,
        time_date_stamp: raw.read_u32_at(4, LE).ok_or_else(bad)?,
        pointer_to_symbol_table: raw.read_u32_at(8, LE).ok_or_else(bad)?,
        number_of_symbols: raw.read_u32_at(12, LE).ok_or_else(bad)?,
        size_of_optional_header: raw.read_u16_at(16, LE).ok_or_else(bad)?,
        characteristics: raw.read_u16_at(18, LE).ok_or_else(bad)?,
    })
}

/// Size of the fixed part of the optional header, before the data directories.
pub fn optional_header_fixed_size(is_64bit: bool) -> usize {
    if is_64bit {
        112
    } else {
        96
    }
}

/// Parse optional header from data at offset
pub fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    let raw = data
        .read_slice_at(offset, size as usize)
        .ok_or(truncated(offset + size as usize, data.len()))?;
    let magic = raw.read_u16_at(0, LE).ok_or(truncated(offset + 2, data.len()))?;
    let is_64bit = match magic {
        PE32_MAGIC => false,
        PE32PLUS_MAGIC => true,
        _ => return Err(PeError::InvalidMagic(magic)),
    };

    let fixed = optional_header_fixed_size(is_64bit);
    if raw.len() < fixed {
        return Err(truncated(offset + fixed, offset + raw.len()));
    }

    let bad = || truncated(offset + fixed, data.len());
    let u8_at = |off: usize| raw.read_u8_at(off).ok_or_else(bad);
    let u16_at = |off: usize| raw.read_u16_at(off, LE).ok_or_else(bad);
    let u32_at = |off: usize| raw.read_u32_at(off, LE).ok_or_else(bad);
    let u64_at = |off: usize| raw.read_u64_at(off, LE).ok_or_else(bad);
    // Stack/heap sizes are word-sized; everything after them shifts by 16 in PE32+.
    let word_at = |off: usize| {
        if is_64bit {
            u64_at(off)
        } else {
            u32_at(off).map(u64::from)
        }
    };
    let w = if is_64bit { 8 } else { 4 };

    let common = OptionalHeaderCommon {
        magic,
        major_linker_version: u8_at(2)?,
        minor_linker_version: u8_at(3)?,
        size_of_code: u32_at(4)?,
        size_of_initialized_data: u32_at(8)?,
        size_of_uninitialized_data: u32_at(12)?,
        address_of_entry_point: u32_at(16)?,
        base_of_code: u32_at(20)?,
    };

    let (base_of_data, image_base) = if is_64bit {
        (0, u64_at(24)?)
    } else {
        (u32_at(24)?, u32_at(28)? as u64)
    };

    let windows = WindowsFields {
        image_base,
        section_alignment: u32_at(32)?,
        file_alignment: u32_at(36)?,
        major_operating_system_version: u16_at(40)?,
        minor_operating_system_version: u16_at(42)?,
        major_image_version: u16_at(44)?,
        minor_image_version: u16_at(46)?,
        major_subsystem_version: u16_at(48)?,
        minor_subsystem_version: u16_at(50)?,
        win32_version_value: u32_at(52)?,
        size_of_image: u32_at(56)?,
        size_of_headers: u32_at(60)?,
        checksum: u32_at(64)?,
        subsystem: u16_at(68)?,
        dll_characteristics: u16_at(70)?,
        size_of_stack_reserve: word_at(72)?,
        size_of_stack_commit: word_at(72 + w)?,
        size_of_heap_reserve: word_at(72 + 2 * w)?,
        size_of_heap_commit: word_at(72 + 3 * w)?,
        loader_flags: u32_at(72 + 4 * w)?,
        number_of_rva_and_sizes: u32_at(76 + 4 * w)?,
    };

    Ok(OptionalHeader {
        common,
        base_of_data,
        windows,
    })
}

/// Parse data directories that fit inside the optional header.
pub fn parse_data_directories(
    data: &[u8],
    offset: usize,
    count: u32,
    room: usize,
) -> Result<Vec<DataDirectory>> {
    let count = (count as usize).min(16).min(room / 8);
    let mut directories = Vec::with_capacity(count);

    for i in 0..count {
        let dir_offset = offset + i * 8;
        let bad = || truncated(dir_offset + 8, data.len());
        directories.push(DataDirectory {
            virtual_address: data.read_u32_at(dir_offset, LE).ok_or_else(bad)?,
            size: data.read_u32_at(dir_offset + 4, LE).ok_or_else(bad)?,
        });
    }

    Ok(directories)
}

pub fn encode_coff_header(coff: &CoffHeader) -> Vec<u8> {
    let mut sink = ByteSink::with_capacity(LE, 20);
    sink.u16(coff.machine)
        .u16(coff.number_of_sections)
        .u32(coff.time_date_stamp)
        .u32(coff.pointer_to_symbol_table)
        .u32(coff.number_of_symbols)
        .u16(coff.size_of_optional_header)
        .u16(coff.characteristics);
    sink.into_inner()
}

/// Encode the fixed part of the optional header followed by `directories`.
pub fn encode_optional_header(header: &OptionalHeader, directories: &[DataDirectory]) -> Vec<u8> {
    let is_64bit = header.is_64bit();
    let c = &header.common;
    let w = &header.windows;
    let mut sink = ByteSink::with_capacity(
        LE,
        optional_header_fixed_size(is_64bit) + directories.len() * 8,
    );

    sink.u16(c.magic)
        .u8(c.major_linker_version)
        .u8(c.minor_linker_version)
        .u32(c.size_of_code)
        .u32(c.size_of_initialized_data)
        .u32(c.size_of_uninitialized_data)
        .u32(c.address_of_entry_point)
        .u32(c.base_of_code);
    if is_64bit {
        sink.u64(w.image_base);
    } else {
        sink.u32(header.base_of_data).u32(w.image_base as u32);
    }
    sink.u32(w.section_alignment)
        .u32(w.file_alignment)
        .u16(w.major_operating_system_version)
        .u16(w.minor_operating_system_version)
        .u16(w.major_image_version)
        .u16(w.minor_image_version)
        .u16(w.major_subsystem_version)
        .u16(w.minor_subsystem_version)
        .u32(w.win32_version_value)
        .u32(w.size_of_image)
        .u32(w.size_of_headers)
        .u32(w.checksum)
        .u16(w.subsystem)
        .u16(w.dll_characteristics)
        .addr(w.size_of_stack_reserve, is_64bit)
        .addr(w.size_of_stack_commit, is_64bit)
        .addr(w.size_of_heap_reserve, is_64bit)
        .addr(w.size_of_heap_commit, is_64bit)
        .u32(w.loader_flags)
        .u32(w.number_of_rva_and_sizes);

    for dir in directories {
        sink.u32(dir.virtual_address).u32(dir.size);
    }
    sink.into_inner()
}
