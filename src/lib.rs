//! binforge: read, patch and rewrite ELF, PE and Mach-O binaries.
//!
//! [`parse`] detects the container and returns a [`Parsed`] value: a
//! [`Binary`] for single images, a [`FatBinary`] for universal Mach-O files,
//! or `Unrecognized`. Every binary implements [`GenericBinary`], which covers
//! the format-independent accessors, patching by virtual address and
//! write-back. The concrete types under [`formats`] carry the rest.

pub mod config;
pub mod core;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;

pub use crate::config::{EngineConfig, ParseConfig, WriteConfig};
pub use crate::core::binary::{
    Arch, Binary, Endianness, Format, GenericBinary, Header, ObjectType,
};
pub use crate::core::parse::{parse, parse_binary, parse_bytes, parse_with, Parsed};
pub use crate::core::relocation::Relocation;
pub use crate::core::section::Section;
pub use crate::core::segment::Segment;
pub use crate::core::summary::BinarySummary;
pub use crate::core::symbol::Symbol;
pub use crate::error::{Error, Result};
pub use crate::formats::detect::detect;
pub use crate::formats::elf::ElfBinary;
pub use crate::formats::macho::{FatBinary, MachOBinary};
pub use crate::formats::pe::PeBinary;
