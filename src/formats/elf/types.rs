//! Core ELF types and constants

use crate::core::binary::Arch;
use crate::formats::bytes::Endian;
use std::fmt;

/// ELF parsing errors
#[derive(Debug, Clone)]
pub enum ElfError {
    InvalidMagic,
    UnsupportedClass(u8),
    UnsupportedData(u8),
    InvalidOffset { offset: usize },
    Truncated { offset: usize, needed: usize },
    MalformedHeader(String),
    SectionOutOfBounds { index: usize, offset: u64, size: u64 },
    SegmentOutOfBounds { index: usize, offset: u64, size: u64 },
    LimitExceeded(&'static str),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "Invalid ELF magic"),
            Self::UnsupportedClass(c) => write!(f, "Unsupported ELF class: {}", c),
            Self::UnsupportedData(d) => write!(f, "Unsupported ELF data encoding: {}", d),
            Self::InvalidOffset { offset } => write!(f, "Invalid offset: {:#x}", offset),
            Self::Truncated { offset, needed } => {
                write!(f, "Truncated at {:#x}, needed {} bytes", offset, needed)
            }
            Self::MalformedHeader(msg) => write!(f, "Malformed header: {}", msg),
            Self::SectionOutOfBounds {
                index,
                offset,
                size,
            } => write!(
                f,
                "Section {} data [{:#x}, +{:#x}) lies outside the file",
                index, offset, size
            ),
            Self::SegmentOutOfBounds {
                index,
                offset,
                size,
            } => write!(
                f,
                "Segment {} data [{:#x}, +{:#x}) lies outside the file",
                index, offset, size
            ),
            Self::LimitExceeded(what) => write!(f, "Limit exceeded: {}", what),
        }
    }
}

impl std::error::Error for ElfError {}

pub type Result<T> = std::result::Result<T, ElfError>;

/// ELF magic number
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// ELF class (32-bit or 64-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

impl ElfClass {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfClass::Elf32),
            2 => Ok(ElfClass::Elf64),
            _ => Err(ElfError::UnsupportedClass(val)),
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 64,
        }
    }

    pub fn is_64(&self) -> bool {
        matches!(self, ElfClass::Elf64)
    }

    pub fn header_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    pub fn phdr_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    pub fn shdr_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }
}

/// ELF data encoding (endianness)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    Little = 1,
    Big = 2,
}

impl ElfData {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfData::Little),
            2 => Ok(ElfData::Big),
            _ => Err(ElfError::UnsupportedData(val)),
        }
    }

    pub fn endian(&self) -> Endian {
        match self {
            ElfData::Little => Endian::Little,
            ElfData::Big => Endian::Big,
        }
    }
}

/// ELF file type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None = 0,
    Relocatable = 1,
    Executable = 2,
    SharedObject = 3,
    Core = 4,
}

impl From<u16> for ElfType {
    fn from(val: u16) -> Self {
        match val {
            1 => ElfType::Relocatable,
            2 => ElfType::Executable,
            3 => ElfType::SharedObject,
            4 => ElfType::Core,
            _ => ElfType::None,
        }
    }
}

pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

/// Map `e_machine` to the generic architecture.
pub fn machine_arch(machine: u16, class: ElfClass) -> Arch {
    match (machine, class) {
        (EM_386, _) => Arch::X86,
        (EM_X86_64, _) => Arch::X86_64,
        (EM_ARM, _) => Arch::ARM,
        (EM_AARCH64, _) => Arch::AArch64,
        (EM_MIPS, ElfClass::Elf32) => Arch::MIPS,
        (EM_MIPS, ElfClass::Elf64) => Arch::MIPS64,
        (EM_PPC, _) => Arch::PPC,
        (EM_PPC64, _) => Arch::PPC64,
        (EM_RISCV, ElfClass::Elf32) => Arch::RISCV,
        (EM_RISCV, ElfClass::Elf64) => Arch::RISCV64,
        _ => Arch::Unknown,
    }
}

/// ELF identification (first 16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfIdent {
    pub class: ElfClass,
    pub data: ElfData,
    pub version: u8,
    pub osabi: u8,
    pub abiversion: u8,
    /// The identification bytes as read, padding included.
    pub raw: [u8; 16],
}

/// ELF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub ident: ElfIdent,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    pub fn file_type(&self) -> ElfType {
        ElfType::from(self.e_type)
    }

    pub fn entry_point(&self) -> u64 {
        self.e_entry
    }

    pub fn class(&self) -> ElfClass {
        self.ident.class
    }

    pub fn endian(&self) -> Endian {
        self.ident.data.endian()
    }
}

/// Section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// Section types
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHT_DYNSYM: u32 = 11;

/// Section flags
pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

/// Special section indices
pub const SHN_UNDEF: u16 = 0;
pub const SHN_XINDEX: u16 = 0xffff;

/// Program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Program header types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_SHLIB: u32 = 5;
pub const PT_PHDR: u32 = 6;
pub const PT_TLS: u32 = 7;
pub const PT_GNU_EH_FRAME: u32 = 0x6474e550;
pub const PT_GNU_STACK: u32 = 0x6474e551;
pub const PT_GNU_RELRO: u32 = 0x6474e552;
pub const PT_GNU_PROPERTY: u32 = 0x6474e553;

/// Program header flags
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

/// Symbol entry with its resolved name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSymbol {
    pub name: String,
    pub st_value: u64,
    pub st_size: u64,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    /// Came from `.dynsym` rather than `.symtab`.
    pub dynamic: bool,
}

impl ElfSymbol {
    pub fn st_bind(&self) -> u8 {
        self.st_info >> 4
    }

    pub fn st_type(&self) -> u8 {
        self.st_info & 0xf
    }

    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }
}

/// Relocation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfRelocation {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_sym: u32,
    /// Only for RELA
    pub r_addend: Option<i64>,
    /// Index of the SHT_REL/SHT_RELA section holding the entry.
    pub section: usize,
}
