//! Mach-O header parsing and encoding

use crate::formats::bytes::{ByteSink, Endian, ReadExt};
use crate::formats::macho::types::*;
use bitflags::bitflags;

bitflags! {
    /// `mach_header.flags`. Unknown bits are kept as read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u32 {
        const NOUNDEFS = 0x1;
        const INCRLINK = 0x2;
        const DYLDLINK = 0x4;
        const BINDATLOAD = 0x8;
        const PREBOUND = 0x10;
        const SPLIT_SEGS = 0x20;
        const TWOLEVEL = 0x80;
        const FORCE_FLAT = 0x100;
        const NOMULTIDEFS = 0x200;
        const NOFIXPREBINDING = 0x400;
        const PREBINDABLE = 0x800;
        const ALLMODSBOUND = 0x1000;
        const SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const CANONICAL = 0x4000;
        const WEAK_DEFINES = 0x8000;
        const BINDS_TO_WEAK = 0x10000;
        const ALLOW_STACK_EXECUTION = 0x20000;
        const ROOT_SAFE = 0x40000;
        const SETUID_SAFE = 0x80000;
        const NO_REEXPORTED_DYLIBS = 0x100000;
        const PIE = 0x200000;
        const DEAD_STRIPPABLE_DYLIB = 0x400000;
        const HAS_TLV_DESCRIPTORS = 0x800000;
        const NO_HEAP_EXECUTION = 0x1000000;
        const APP_EXTENSION_SAFE = 0x2000000;
        const SIM_SUPPORT = 0x8000000;
        const DYLIB_IN_CACHE = 0x80000000;
    }
}

/// `mach_header` / `mach_header_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    /// `MH_MAGIC` or `MH_MAGIC_64`; byte order is tracked separately.
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: HeaderFlags,
    /// Only present in 64-bit headers.
    pub reserved: u32,
    endian: Endian,
}

impl MachHeader {
    pub fn is_64(&self) -> bool {
        self.magic == MH_MAGIC_64
    }

    pub fn is_32(&self) -> bool {
        !self.is_64()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn size(&self) -> usize {
        if self.is_64() {
            32
        } else {
            28
        }
    }

    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Byte order and width from the first four bytes, if they are a thin magic.
pub fn thin_magic(data: &[u8]) -> Option<(Endian, bool)> {
    match data.read_u32_at(0, Endian::Little)? {
        MH_MAGIC => Some((Endian::Little, false)),
        MH_MAGIC_64 => Some((Endian::Little, true)),
        MH_CIGAM => Some((Endian::Big, false)),
        MH_CIGAM_64 => Some((Endian::Big, true)),
        _ => None,
    }
}

pub fn parse_header(data: &[u8]) -> Result<MachHeader> {
    let raw = data.read_u32_at(0, Endian::Little).ok_or(MachOError::Truncated {
        offset: 0,
        needed: 4,
    })?;
    let (endian, is_64) = thin_magic(data).ok_or(MachOError::InvalidMagic(raw))?;
    let size = if is_64 { 32 } else { 28 };
    if data.len() < size {
        return Err(MachOError::Truncated {
            offset: 0,
            needed: size,
        });
    }

    let word = |offset: usize| {
        data.read_u32_at(offset, endian).ok_or(MachOError::Truncated {
            offset,
            needed: 4,
        })
    };
    Ok(MachHeader {
        magic: if is_64 { MH_MAGIC_64 } else { MH_MAGIC },
        cputype: word(4)?,
        cpusubtype: word(8)?,
        filetype: word(12)?,
        ncmds: word(16)?,
        sizeofcmds: word(20)?,
        flags: HeaderFlags::from_bits_retain(word(24)?),
        reserved: if is_64 { word(28)? } else { 0 },
        endian,
    })
}

pub fn encode_header(header: &MachHeader) -> Vec<u8> {
    let mut sink = ByteSink::with_capacity(header.endian, header.size());
    sink.u32(header.magic)
        .u32(header.cputype)
        .u32(header.cpusubtype)
        .u32(header.filetype)
        .u32(header.ncmds)
        .u32(header.sizeofcmds)
        .u32(header.flags.bits());
    if header.is_64() {
        sink.u32(header.reserved);
    }
    sink.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(endian: Endian) -> Vec<u8> {
        let mut sink = ByteSink::new(endian);
        sink.u32(MH_MAGIC_64)
            .u32(cpu_type::ARM64)
            .u32(0)
            .u32(MH_EXECUTE)
            .u32(3)
            .u32(0x120)
            .u32(0x0020_0085)
            .u32(0);
        sink.into_inner()
    }

    #[test]
    fn test_parse_both_orders() {
        for endian in [Endian::Little, Endian::Big] {
            let header = parse_header(&header_bytes(endian)).unwrap();
            assert!(header.is_64());
            assert_eq!(header.endian(), endian);
            assert_eq!(header.cputype, cpu_type::ARM64);
            assert_eq!(header.ncmds, 3);
            assert!(header.has_flag(HeaderFlags::PIE));
            assert!(!header.has_flag(HeaderFlags::ALLOW_STACK_EXECUTION));
        }
    }

    #[test]
    fn test_encode_is_exact() {
        let bytes = header_bytes(Endian::Big);
        assert_eq!(encode_header(&parse_header(&bytes).unwrap()), bytes);
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        assert!(matches!(
            parse_header(b"\x7fELF\0\0\0\0"),
            Err(MachOError::InvalidMagic(_))
        ));
        let bytes = header_bytes(Endian::Little);
        assert!(matches!(
            parse_header(&bytes[..20]),
            Err(MachOError::Truncated { .. })
        ));
    }
}
