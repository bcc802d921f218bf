//! Core PE data types and structures

use crate::core::binary::Arch;
use std::fmt;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

// Data directory indices
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;

// DLL characteristics
pub const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;
pub const IMAGE_DLLCHARACTERISTICS_NX_COMPAT: u16 = 0x0100;

// COFF characteristics
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
pub const IMAGE_FILE_DLL: u16 = 0x2000;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x00000020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x00000040;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x20000000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x80000000;

// Base relocation types
pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
pub const IMAGE_REL_BASED_HIGH: u8 = 1;
pub const IMAGE_REL_BASED_LOW: u8 = 2;
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

/// PE parsing error types
#[derive(Debug, Clone)]
pub enum PeError {
    InvalidDosSignature,
    InvalidPeSignature,
    InvalidMagic(u16),
    TruncatedHeader { expected: usize, actual: usize },
    InvalidRva { rva: u32 },
    InvalidOffset { offset: usize },
    SectionOutOfBounds { name: String, offset: u32, size: u32 },
    MalformedImportTable,
    MalformedExportTable,
    LimitExceeded(&'static str),
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDosSignature => write!(f, "Invalid DOS signature"),
            Self::InvalidPeSignature => write!(f, "Invalid PE signature"),
            Self::InvalidMagic(m) => write!(f, "Invalid optional header magic: 0x{:04x}", m),
            Self::TruncatedHeader { expected, actual } => {
                write!(
                    f,
                    "Truncated header: expected {} bytes, got {}",
                    expected, actual
                )
            }
            Self::InvalidRva { rva } => write!(f, "Invalid RVA: 0x{:08x}", rva),
            Self::InvalidOffset { offset } => write!(f, "Invalid file offset: 0x{:x}", offset),
            Self::SectionOutOfBounds { name, offset, size } => write!(
                f,
                "Section {} raw data [0x{:x}, +0x{:x}) lies outside the file",
                name, offset, size
            ),
            Self::MalformedImportTable => write!(f, "Malformed import table"),
            Self::MalformedExportTable => write!(f, "Malformed export table"),
            Self::LimitExceeded(what) => write!(f, "Limit exceeded: {}", what),
        }
    }
}

impl std::error::Error for PeError {}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    Arm64,  // 0xaa64
    ArmNT,  // 0x01c4
    IA64,   // 0x0200
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0x01c4 => Self::ArmNT,
            0x0200 => Self::IA64,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

impl Machine {
    pub fn arch(&self) -> Arch {
        match self {
            Self::I386 => Arch::X86,
            Self::X86_64 => Arch::X86_64,
            Self::Arm | Self::ArmNT => Arch::ARM,
            Self::Arm64 => Arch::AArch64,
            _ => Arch::Unknown,
        }
    }
}

/// Subsystem types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Unknown,
    Native,                 // 1
    WindowsGui,             // 2
    WindowsCui,             // 3
    Os2Cui,                 // 5
    PosixCui,               // 7
    WindowsCeGui,           // 9
    EfiApplication,         // 10
    EfiBootServiceDriver,   // 11
    EfiRuntimeDriver,       // 12
    EfiRom,                 // 13
    Xbox,                   // 14
    WindowsBootApplication, // 16
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Native,
            2 => Self::WindowsGui,
            3 => Self::WindowsCui,
            5 => Self::Os2Cui,
            7 => Self::PosixCui,
            9 => Self::WindowsCeGui,
            10 => Self::EfiApplication,
            11 => Self::EfiBootServiceDriver,
            12 => Self::EfiRuntimeDriver,
            13 => Self::EfiRom,
            14 => Self::Xbox,
            16 => Self::WindowsBootApplication,
            other => Self::Other(other),
        }
    }
}

/// Optional header flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeMagic {
    Pe32,
    Pe32Plus,
    Unknown,
}

impl From<u16> for PeMagic {
    fn from(value: u16) -> Self {
        match value {
            PE32_MAGIC => Self::Pe32,
            PE32PLUS_MAGIC => Self::Pe32Plus,
            _ => Self::Unknown,
        }
    }
}

/// DOS header fields the loader looks at. The rest of the stub stays in the image.
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub e_magic: u16,    // Magic number (MZ)
    pub e_lfanew: u32,   // File address of PE header
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub fn machine(&self) -> Machine {
        Machine::from(self.machine)
    }

    pub fn is_dll(&self) -> bool {
        (self.characteristics & IMAGE_FILE_DLL) != 0
    }
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

/// Optional header - common fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeaderCommon {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

/// Fields past `base_of_code` shared by both flavors; widths follow PE32+.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsFields {
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// The optional header as parsed.
///
/// `base_of_data` only exists in PE32 images and reads as 0 for PE32+.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    pub common: OptionalHeaderCommon,
    pub base_of_data: u32,
    pub windows: WindowsFields,
}

impl OptionalHeader {
    pub fn magic(&self) -> PeMagic {
        PeMagic::from(self.common.magic)
    }

    pub fn is_64bit(&self) -> bool {
        self.magic() == PeMagic::Pe32Plus
    }

    pub fn major_linker_version(&self) -> u8 {
        self.common.major_linker_version
    }

    pub fn minor_linker_version(&self) -> u8 {
        self.common.minor_linker_version
    }

    pub fn sizeof_code(&self) -> u32 {
        self.common.size_of_code
    }

    pub fn sizeof_initialized_data(&self) -> u32 {
        self.common.size_of_initialized_data
    }

    pub fn sizeof_uninitialized_data(&self) -> u32 {
        self.common.size_of_uninitialized_data
    }

    pub fn addressof_entrypoint(&self) -> u32 {
        self.common.address_of_entry_point
    }

    #[cfg(test)]
    pub(crate) fn set_addressof_entrypoint(&mut self, rva: u32) {
        self.common.address_of_entry_point = rva;
    }

    pub fn baseof_code(&self) -> u32 {
        self.common.base_of_code
    }

    pub fn baseof_data(&self) -> u32 {
        if self.is_64bit() {
            0
        } else {
            self.base_of_data
        }
    }

    pub fn imagebase(&self) -> u64 {
        self.windows.image_base
    }

    pub fn section_alignment(&self) -> u32 {
        self.windows.section_alignment
    }

    pub fn file_alignment(&self) -> u32 {
        self.windows.file_alignment
    }

    pub fn major_operating_system_version(&self) -> u16 {
        self.windows.major_operating_system_version
    }

    pub fn minor_operating_system_version(&self) -> u16 {
        self.windows.minor_operating_system_version
    }

    pub fn major_image_version(&self) -> u16 {
        self.windows.major_image_version
    }

    pub fn minor_image_version(&self) -> u16 {
        self.windows.minor_image_version
    }

    pub fn major_subsystem_version(&self) -> u16 {
        self.windows.major_subsystem_version
    }

    pub fn minor_subsystem_version(&self) -> u16 {
        self.windows.minor_subsystem_version
    }

    pub fn win32_version_value(&self) -> u32 {
        self.windows.win32_version_value
    }

    pub fn sizeof_image(&self) -> u32 {
        self.windows.size_of_image
    }

    pub fn sizeof_headers(&self) -> u32 {
        self.windows.size_of_headers
    }

    pub fn checksum(&self) -> u32 {
        self.windows.checksum
    }

    pub fn subsystem(&self) -> Subsystem {
        Subsystem::from(self.windows.subsystem)
    }

    pub fn dll_characteristics(&self) -> u16 {
        self.windows.dll_characteristics
    }

    pub fn has_dll_characteristic(&self, flag: u16) -> bool {
        (self.windows.dll_characteristics & flag) != 0
    }

    pub fn sizeof_stack_reserve(&self) -> u64 {
        self.windows.size_of_stack_reserve
    }

    pub fn sizeof_stack_commit(&self) -> u64 {
        self.windows.size_of_stack_commit
    }

    pub fn sizeof_heap_reserve(&self) -> u64 {
        self.windows.size_of_heap_reserve
    }

    pub fn sizeof_heap_commit(&self) -> u64 {
        self.windows.size_of_heap_commit
    }

    pub fn loader_flags(&self) -> u32 {
        self.windows.loader_flags
    }

    pub fn numberof_rva_and_size(&self) -> u32 {
        self.windows.number_of_rva_and_sizes
    }
}

/// Section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn contains_rva(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && rva - self.virtual_address < size
    }

    pub fn is_executable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_EXECUTE) != 0
    }

    pub fn is_readable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_READ) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.characteristics & IMAGE_SCN_MEM_WRITE) != 0
    }

    pub fn contains_code(&self) -> bool {
        (self.characteristics & IMAGE_SCN_CNT_CODE) != 0
    }
}

/// Export entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: Option<String>,
    pub ordinal: u32,
    pub rva: u32,
    pub forwarder: Option<String>,
}

/// Import entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub dll: String,
    pub name: Option<String>,
    pub ordinal: Option<u16>,
    pub hint: Option<u16>,
    /// RVA of the IAT slot the loader fills in.
    pub iat_rva: u32,
}

/// COFF symbol table record. Auxiliary records are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffSymbol {
    pub name: String,
    pub value: u32,
    pub section_number: i16,
    pub symbol_type: u16,
    pub storage_class: u8,
}

/// One base relocation fixup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRelocation {
    pub rva: u32,
    pub kind: u8,
}

impl BaseRelocation {
    /// Width in bits of the patched field.
    pub fn size(&self) -> u32 {
        match self.kind {
            IMAGE_REL_BASED_HIGH | IMAGE_REL_BASED_LOW => 16,
            IMAGE_REL_BASED_HIGHLOW => 32,
            IMAGE_REL_BASED_DIR64 => 64,
            _ => 0,
        }
    }
}
