//! ELF header parsing and encoding

use crate::formats::bytes::{ByteSink, ReadExt};
use crate::formats::elf::types::*;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    let raw: [u8; 16] = data
        .get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or(ElfError::Truncated {
            offset: 0,
            needed: 16,
        })?;

    if &raw[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    Ok(ElfIdent {
        class: ElfClass::from_u8(raw[4])?,
        data: ElfData::from_u8(raw[5])?,
        version: raw[6],
        osabi: raw[7],
        abiversion: raw[8],
        raw,
    })
}

/// Parse ELF header
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;
    let class = ident.class;
    let endian = ident.data.endian();

    let header_size = class.header_size();
    if data.len() < header_size {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    let truncated = |offset: usize, needed: usize| ElfError::Truncated { offset, needed };
    let u16_at = |off: usize| data.read_u16_at(off, endian).ok_or(truncated(off, 2));
    let u32_at = |off: usize| data.read_u32_at(off, endian).ok_or(truncated(off, 4));
    let word_at = |off: usize| match class {
        ElfClass::Elf32 => data
            .read_u32_at(off, endian)
            .map(u64::from)
            .ok_or(truncated(off, 4)),
        ElfClass::Elf64 => data.read_u64_at(off, endian).ok_or(truncated(off, 8)),
    };

    // Offsets past e_entry shift by the word size
    let w = if class.is_64() { 8 } else { 4 };
    let header = ElfHeader {
        ident,
        e_type: u16_at(16)?,
        e_machine: u16_at(18)?,
        e_version: u32_at(20)?,
        e_entry: word_at(24)?,
        e_phoff: word_at(24 + w)?,
        e_shoff: word_at(24 + 2 * w)?,
        e_flags: u32_at(24 + 3 * w)?,
        e_ehsize: u16_at(28 + 3 * w)?,
        e_phentsize: u16_at(30 + 3 * w)?,
        e_phnum: u16_at(32 + 3 * w)?,
        e_shentsize: u16_at(34 + 3 * w)?,
        e_shnum: u16_at(36 + 3 * w)?,
        e_shstrndx: u16_at(38 + 3 * w)?,
    };

    validate_header(&header)?;
    Ok(header)
}

fn validate_header(header: &ElfHeader) -> Result<()> {
    let class = header.ident.class;

    if header.e_ehsize as usize != class.header_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_ehsize: expected {}, got {}",
            class.header_size(),
            header.e_ehsize
        )));
    }

    if header.e_phnum > 0 && header.e_phentsize as usize != class.phdr_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected {}, got {}",
            class.phdr_size(),
            header.e_phentsize
        )));
    }

    if header.e_shoff != 0 && header.e_shentsize as usize != class.shdr_size() {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_shentsize: expected {}, got {}",
            class.shdr_size(),
            header.e_shentsize
        )));
    }

    Ok(())
}

/// Encode the header back into its on-disk form.
pub fn encode_header(header: &ElfHeader) -> Vec<u8> {
    let class = header.ident.class;
    let wide = class.is_64();
    let mut sink = ByteSink::with_capacity(header.endian(), class.header_size());
    sink.bytes(&header.ident.raw)
        .u16(header.e_type)
        .u16(header.e_machine)
        .u32(header.e_version)
        .addr(header.e_entry, wide)
        .addr(header.e_phoff, wide)
        .addr(header.e_shoff, wide)
        .u32(header.e_flags)
        .u16(header.e_ehsize)
        .u16(header.e_phentsize)
        .u16(header.e_phnum)
        .u16(header.e_shentsize)
        .u16(header.e_shnum)
        .u16(header.e_shstrndx);
    sink.into_inner()
}
