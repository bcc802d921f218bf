//! Core Mach-O types and constants

use crate::core::binary::Arch;
use std::fmt;

/// Mach-O parsing errors
#[derive(Debug, Clone)]
pub enum MachOError {
    InvalidMagic(u32),
    Truncated { offset: usize, needed: usize },
    MalformedLoadCommand { index: usize, reason: String },
    SegmentOutOfBounds { name: String, offset: u64, size: u64 },
    SectionOutOfBounds { name: String, offset: u64, size: u64 },
    FatSliceOutOfBounds { index: usize, offset: u64, size: u64 },
    InvalidFatSlice { index: usize, magic: u32 },
    LimitExceeded(&'static str),
}

impl fmt::Display for MachOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic(m) => write!(f, "Invalid Mach-O magic: {:#x}", m),
            Self::Truncated { offset, needed } => {
                write!(f, "Truncated at {:#x}, needed {} bytes", offset, needed)
            }
            Self::MalformedLoadCommand { index, reason } => {
                write!(f, "Malformed load command {}: {}", index, reason)
            }
            Self::SegmentOutOfBounds { name, offset, size } => write!(
                f,
                "Segment {} data [{:#x}, +{:#x}) lies outside the file",
                name, offset, size
            ),
            Self::SectionOutOfBounds { name, offset, size } => write!(
                f,
                "Section {} data [{:#x}, +{:#x}) lies outside the file",
                name, offset, size
            ),
            Self::FatSliceOutOfBounds {
                index,
                offset,
                size,
            } => write!(
                f,
                "Fat slice {} [{:#x}, +{:#x}) lies outside the file",
                index, offset, size
            ),
            Self::InvalidFatSlice { index, magic } => {
                write!(f, "Fat slice {} has no Mach-O magic ({:#x})", index, magic)
            }
            Self::LimitExceeded(what) => write!(f, "Limit exceeded: {}", what),
        }
    }
}

impl std::error::Error for MachOError {}

pub type Result<T> = std::result::Result<T, MachOError>;

// Magics as read in the file's own byte order
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;
pub const FAT_CIGAM_64: u32 = 0xbfba_feca;

/// Java class files share 0xcafebabe; their "arch count" is a class version.
pub const FAT_JAVA_THRESHOLD: u32 = 45;

/// CPU type constants
pub mod cpu_type {
    pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
    pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
    pub const VAX: u32 = 1;
    pub const MC680X0: u32 = 6;
    pub const X86: u32 = 7;
    pub const X86_64: u32 = X86 | CPU_ARCH_ABI64;
    pub const MIPS: u32 = 8;
    pub const ARM: u32 = 12;
    pub const ARM64: u32 = ARM | CPU_ARCH_ABI64;
    pub const ARM64_32: u32 = ARM | CPU_ARCH_ABI64_32;
    pub const SPARC: u32 = 14;
    pub const POWERPC: u32 = 18;
    pub const POWERPC64: u32 = POWERPC | CPU_ARCH_ABI64;
}

pub fn arch_for(cputype: u32) -> Arch {
    match cputype {
        cpu_type::X86 => Arch::X86,
        cpu_type::X86_64 => Arch::X86_64,
        cpu_type::ARM | cpu_type::ARM64_32 => Arch::ARM,
        cpu_type::ARM64 => Arch::AArch64,
        cpu_type::MIPS => Arch::MIPS,
        cpu_type::POWERPC => Arch::PPC,
        cpu_type::POWERPC64 => Arch::PPC64,
        _ => Arch::Unknown,
    }
}

/// Segment alignment the loader expects for a CPU.
pub fn page_size(cputype: u32) -> u64 {
    match cputype {
        cpu_type::ARM64 | cpu_type::ARM64_32 => 0x4000,
        _ => 0x1000,
    }
}

// File types
pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_FVMLIB: u32 = 0x3;
pub const MH_CORE: u32 = 0x4;
pub const MH_PRELOAD: u32 = 0x5;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_DYLINKER: u32 = 0x7;
pub const MH_BUNDLE: u32 = 0x8;
pub const MH_DYLIB_STUB: u32 = 0x9;
pub const MH_DSYM: u32 = 0xa;
pub const MH_KEXT_BUNDLE: u32 = 0xb;

// Load commands
pub const LC_REQ_DYLD: u32 = 0x8000_0000;
pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_THREAD: u32 = 0x4;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_LOAD_DYLINKER: u32 = 0xe;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1b;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_SOURCE_VERSION: u32 = 0x2a;
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2b;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2c;
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2e;
pub const LC_NOTE: u32 = 0x31;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;
pub const LC_ATOM_INFO: u32 = 0x36;

/// Commands laid out as `linkedit_data_command` (`dataoff` at +8).
pub fn is_linkedit_data(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_CODE_SIGNATURE
            | LC_SEGMENT_SPLIT_INFO
            | LC_FUNCTION_STARTS
            | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS
            | LC_LINKER_OPTIMIZATION_HINT
            | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS
            | LC_ATOM_INFO
    )
}

// Section types (low byte of flags)
pub const SECTION_TYPE: u32 = 0xff;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_GB_ZEROFILL: u32 = 0xc;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

// nlist
pub const N_STAB: u8 = 0xe0;
pub const N_TYPE: u8 = 0x0e;
pub const N_EXT: u8 = 0x01;
pub const N_UNDF: u8 = 0x0;
pub const N_SECT: u8 = 0xe;

/// One entry of the LC_SYMTAB table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nlist {
    pub name: String,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist {
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    pub fn is_undefined(&self) -> bool {
        self.n_type & N_TYPE == N_UNDF
    }
}

/// A decoded `relocation_info` or scattered relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachRelocation {
    /// Offset from the start of the owning section.
    pub address: u32,
    /// Symbol index, or section ordinal when `is_extern` is false.
    pub symbolnum: u32,
    pub pcrel: bool,
    /// log2 of the patched width in bytes.
    pub length: u8,
    pub is_extern: bool,
    pub kind: u8,
    pub scattered: bool,
}

impl MachRelocation {
    /// Patched width in bits.
    pub fn size(&self) -> u32 {
        8 << self.length
    }
}

/// One `fat_arch` / `fat_arch_64` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    /// Alignment as a power of two.
    pub align: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_mapping() {
        assert_eq!(arch_for(cpu_type::X86_64), Arch::X86_64);
        assert_eq!(arch_for(cpu_type::ARM64), Arch::AArch64);
        assert_eq!(arch_for(0x1234), Arch::Unknown);
        assert_eq!(page_size(cpu_type::ARM64), 16384);
        assert_eq!(page_size(cpu_type::X86_64), 4096);
    }

    #[test]
    fn test_relocation_width() {
        let reloc = MachRelocation {
            address: 0,
            symbolnum: 0,
            pcrel: true,
            length: 2,
            is_extern: true,
            kind: 2,
            scattered: false,
        };
        assert_eq!(reloc.size(), 32);
    }

    #[test]
    fn test_linkedit_data_commands() {
        assert!(is_linkedit_data(LC_CODE_SIGNATURE));
        assert!(is_linkedit_data(LC_DYLD_CHAINED_FIXUPS));
        assert!(!is_linkedit_data(LC_SYMTAB));
    }
}
