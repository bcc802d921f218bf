//! Error types for binforge.
//!
//! Parse failures keep their per-format error type and are wrapped here
//! alongside the mutation and serialization failures shared by every format.

use crate::formats::elf::types::ElfError;
use crate::formats::macho::types::MachOError;
use crate::formats::pe::types::PeError;
use crate::io::error::IoError;
use thiserror::Error;

/// Main error type for binforge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No known magic at the start of the input
    #[error("Unrecognized binary format")]
    FormatUnrecognized,

    #[error("ELF parse error: {0}")]
    Elf(#[from] ElfError),

    #[error("PE parse error: {0}")]
    Pe(#[from] PeError),

    #[error("Mach-O parse error: {0}")]
    MachO(#[from] MachOError),

    /// Address not covered by any section or segment
    #[error("Address {address:#x} is not mapped by any section or segment")]
    AddressOutOfRange { address: u64 },

    /// Patch runs past the end of the region that holds its first byte
    #[error("Write of {len} bytes at {address:#x} overflows its region ({available} bytes available)")]
    WriteOverflow {
        address: u64,
        len: usize,
        available: u64,
    },

    /// Serialization would break an ordering or overlap constraint
    #[error("Layout error: {0}")]
    Layout(String),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(IoError::StdIo(err))
    }
}

/// Result type alias for binforge operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AddressOutOfRange { address: 0x1234 };
        assert_eq!(
            err.to_string(),
            "Address 0x1234 is not mapped by any section or segment"
        );

        let err = Error::WriteOverflow {
            address: 0x10fe,
            len: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Write of 4 bytes at 0x10fe overflows its region (2 bytes available)"
        );

        let err = Error::Layout("__LINKEDIT must remain last".to_string());
        assert_eq!(err.to_string(), "Layout error: __LINKEDIT must remain last");
    }

    #[test]
    fn test_format_errors_convert() {
        let err: Error = ElfError::InvalidMagic.into();
        assert!(matches!(err, Error::Elf(ElfError::InvalidMagic)));
        assert_eq!(err.to_string(), "ELF parse error: Invalid ELF magic");

        let err: Error = std::io::Error::other("disk full").into();
        assert!(matches!(err, Error::Io(IoError::StdIo(_))));
    }
}
