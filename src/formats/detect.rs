//! Magic-based format detection.
//!
//! Only the leading bytes are inspected, plus the `e_lfanew` hop for PE.
//! Anything that does not match is [`Format::Unknown`], never an error.

use crate::core::binary::Format;
use crate::formats::bytes::{Endian, ReadExt};
use crate::formats::elf::types::ELF_MAGIC;
use crate::formats::macho::{self, header::thin_magic};
use crate::formats::pe::types::{DOS_SIGNATURE, PE_SIGNATURE};

/// Offset of `e_lfanew` in the DOS header.
const E_LFANEW: usize = 0x3c;

pub fn detect(data: &[u8]) -> Format {
    if data.starts_with(ELF_MAGIC) {
        return Format::ELF;
    }
    if is_pe(data) {
        return Format::PE;
    }
    if thin_magic(data).is_some() || macho::is_fat(data) {
        return Format::MachO;
    }
    Format::Unknown
}

/// `MZ` alone is not enough; the PE signature must be where the DOS header
/// points.
fn is_pe(data: &[u8]) -> bool {
    if data.read_u16_at(0, Endian::Little) != Some(DOS_SIGNATURE) {
        return false;
    }
    data.read_u32_at(E_LFANEW, Endian::Little)
        .and_then(|lfanew| data.read_slice_at(lfanew as usize, 4))
        .is_some_and(|sig| sig == PE_SIGNATURE)
}
