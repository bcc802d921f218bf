//! The unified binary model.
//!
//! [`GenericBinary`] is the narrow surface shared by ELF, PE and Mach-O.
//! [`Binary`] wraps one concrete format and hands out the format-specific
//! type through `as_elf`, `as_pe` and `as_macho`, which return `None` when
//! the cast does not apply.

use crate::config::WriteConfig;
use crate::core::relocation::Relocation;
use crate::core::section::Section;
use crate::core::segment::Segment;
use crate::core::symbol::Symbol;
use crate::core::translate::{self, AddressSpace, Mapping, Region};
use crate::error::Result;
use crate::formats::elf::ElfBinary;
use crate::formats::macho::MachOBinary;
use crate::formats::pe::PeBinary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The executable format of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Executable and Linkable Format (Linux, Unix)
    ELF,
    /// Portable Executable (Windows)
    PE,
    /// Mach Object file format (macOS, iOS)
    MachO,
    /// Unknown or unsupported format
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::ELF => "ELF",
            Format::PE => "PE",
            Format::MachO => "MachO",
            Format::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// The CPU architecture of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// 32-bit x86
    X86,
    /// 64-bit x86
    X86_64,
    /// 32-bit ARM
    ARM,
    /// 64-bit ARM
    AArch64,
    /// MIPS (32-bit)
    MIPS,
    /// MIPS (64-bit)
    MIPS64,
    /// PowerPC (32-bit)
    PPC,
    /// PowerPC (64-bit)
    PPC64,
    /// RISC-V (32-bit)
    RISCV,
    /// RISC-V (64-bit)
    RISCV64,
    /// Unknown or unsupported architecture
    Unknown,
}

impl Arch {
    pub fn is_64_bit(&self) -> bool {
        matches!(
            self,
            Arch::X86_64 | Arch::AArch64 | Arch::MIPS64 | Arch::PPC64 | Arch::RISCV64
        )
    }
}

/// The endianness of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    /// Little-endian byte order
    Little,
    /// Big-endian byte order
    Big,
}

impl From<crate::formats::bytes::Endian> for Endianness {
    fn from(endian: crate::formats::bytes::Endian) -> Self {
        match endian {
            crate::formats::bytes::Endian::Little => Endianness::Little,
            crate::formats::bytes::Endian::Big => Endianness::Big,
        }
    }
}

/// What kind of object the file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Executable,
    Library,
    Object,
    Core,
    Unknown,
}

/// Format-independent header view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub architecture: Arch,
    pub endianness: Endianness,
    pub entrypoint: u64,
    pub object_type: ObjectType,
    /// Address width of the container, 32 or 64.
    pub bits: u8,
}

impl Header {
    pub fn is_32(&self) -> bool {
        self.bits == 32
    }

    pub fn is_64(&self) -> bool {
        self.bits == 64
    }
}

/// The surface every parsed binary offers, whatever its container.
pub trait GenericBinary: AddressSpace {
    fn format(&self) -> Format;

    fn header(&self) -> Header;

    fn entrypoint(&self) -> u64;

    fn is_pie(&self) -> bool;

    fn has_nx(&self) -> bool;

    /// Sections in on-disk table order.
    fn sections(&self) -> Vec<&dyn Section>;

    fn sections_mut(&mut self) -> Vec<&mut dyn Section>;

    fn symbols(&self) -> Vec<Symbol>;

    fn relocations(&self) -> Vec<Relocation>;

    /// Empty at this level; the ELF and Mach-O types expose their own.
    fn segments(&self) -> Vec<Segment> {
        Vec::new()
    }

    fn get_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols().into_iter().find(|s| s.name == name)
    }

    fn get_section(&self, name: &str) -> Option<&dyn Section> {
        self.sections().into_iter().find(|s| s.name() == name)
    }

    fn va_to_offset(&self, address: u64) -> Result<u64> {
        translate::va_to_offset(self, address)
    }

    fn offset_to_va(&self, offset: u64) -> Option<u64> {
        translate::offset_to_va(self, offset)
    }

    /// Read `len` bytes starting at a virtual address.
    fn content_at(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        translate::read(self, address, len)
    }

    /// Overwrite bytes at a virtual address, all or nothing.
    fn patch_address(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        translate::patch(self, address, bytes)
    }

    /// Serialize the current model into a file image.
    fn build_with(&self, config: &WriteConfig) -> Result<Vec<u8>>;

    fn build(&self) -> Result<Vec<u8>> {
        self.build_with(&WriteConfig::default())
    }

    fn write_with(&self, path: &Path, config: &WriteConfig) -> Result<()> {
        let _span = crate::span_trace!("write", path = %path.display()).entered();
        let image = self.build_with(config)?;
        crate::io::write_image(path, &image)?;
        crate::log_info!(path = %path.display(), size = image.len(), "Binary written");
        Ok(())
    }

    fn write(&self, path: &Path) -> Result<()> {
        self.write_with(path, &WriteConfig::default())
    }
}

/// A parsed binary of any supported format.
#[derive(Debug, Clone)]
pub enum Binary {
    Elf(ElfBinary),
    Pe(PeBinary),
    MachO(MachOBinary),
}

impl Binary {
    pub fn as_elf(&self) -> Option<&ElfBinary> {
        match self {
            Binary::Elf(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_elf_mut(&mut self) -> Option<&mut ElfBinary> {
        match self {
            Binary::Elf(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pe(&self) -> Option<&PeBinary> {
        match self {
            Binary::Pe(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pe_mut(&mut self) -> Option<&mut PeBinary> {
        match self {
            Binary::Pe(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_macho(&self) -> Option<&MachOBinary> {
        match self {
            Binary::MachO(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_macho_mut(&mut self) -> Option<&mut MachOBinary> {
        match self {
            Binary::MachO(b) => Some(b),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn GenericBinary {
        match self {
            Binary::Elf(b) => b,
            Binary::Pe(b) => b,
            Binary::MachO(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn GenericBinary {
        match self {
            Binary::Elf(b) => b,
            Binary::Pe(b) => b,
            Binary::MachO(b) => b,
        }
    }
}

impl From<ElfBinary> for Binary {
    fn from(b: ElfBinary) -> Self {
        Binary::Elf(b)
    }
}

impl From<PeBinary> for Binary {
    fn from(b: PeBinary) -> Self {
        Binary::Pe(b)
    }
}

impl From<MachOBinary> for Binary {
    fn from(b: MachOBinary) -> Self {
        Binary::MachO(b)
    }
}

impl AddressSpace for Binary {
    fn mappings(&self) -> Vec<Mapping> {
        self.inner().mappings()
    }

    fn normalize_address(&self, address: u64) -> u64 {
        self.inner().normalize_address(address)
    }

    fn region_bytes(&self, region: Region, delta: u64) -> Option<&[u8]> {
        self.inner().region_bytes(region, delta)
    }

    fn write_region(&mut self, region: Region, delta: u64, bytes: &[u8]) {
        self.inner_mut().write_region(region, delta, bytes)
    }
}

impl GenericBinary for Binary {
    fn format(&self) -> Format {
        self.inner().format()
    }

    fn header(&self) -> Header {
        self.inner().header()
    }

    fn entrypoint(&self) -> u64 {
        self.inner().entrypoint()
    }

    fn is_pie(&self) -> bool {
        self.inner().is_pie()
    }

    fn has_nx(&self) -> bool {
        self.inner().has_nx()
    }

    fn sections(&self) -> Vec<&dyn Section> {
        self.inner().sections()
    }

    fn sections_mut(&mut self) -> Vec<&mut dyn Section> {
        self.inner_mut().sections_mut()
    }

    fn symbols(&self) -> Vec<Symbol> {
        self.inner().symbols()
    }

    fn relocations(&self) -> Vec<Relocation> {
        self.inner().relocations()
    }

    fn segments(&self) -> Vec<Segment> {
        self.inner().segments()
    }

    fn offset_to_va(&self, offset: u64) -> Option<u64> {
        self.inner().offset_to_va(offset)
    }

    fn build_with(&self, config: &WriteConfig) -> Result<Vec<u8>> {
        self.inner().build_with(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display() {
        assert_eq!(Format::ELF.to_string(), "ELF");
        assert_eq!(Format::MachO.to_string(), "MachO");
        assert_eq!(Format::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_header_width() {
        let header = Header {
            architecture: Arch::X86_64,
            endianness: Endianness::Little,
            entrypoint: 0x1000,
            object_type: ObjectType::Executable,
            bits: 64,
        };
        assert!(header.is_64());
        assert!(!header.is_32());
        assert!(header.architecture.is_64_bit());
    }
}
