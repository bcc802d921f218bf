//! Format-agnostic entry points.
//!
//! Detection picks the parser; an unknown magic is an ordinary outcome and
//! comes back as [`Parsed::Unrecognized`].

use crate::config::{EngineConfig, ParseConfig};
use crate::core::binary::{Binary, Format};
use crate::error::{Error, Result};
use crate::formats::detect::detect;
use crate::formats::elf::ElfBinary;
use crate::formats::macho::{self, FatBinary};
use crate::formats::pe::PeBinary;
use std::path::Path;

/// Result of parsing a file of any supported format.
#[derive(Debug, Clone)]
pub enum Parsed {
    /// An ELF, PE or thin Mach-O image.
    Binary(Binary),
    /// A universal Mach-O envelope.
    Fat(FatBinary),
    /// No known magic.
    Unrecognized,
}

impl Parsed {
    pub fn format(&self) -> Format {
        match self {
            Parsed::Binary(binary) => crate::core::binary::GenericBinary::format(binary),
            Parsed::Fat(_) => Format::MachO,
            Parsed::Unrecognized => Format::Unknown,
        }
    }

    pub fn into_binary(self) -> Option<Binary> {
        match self {
            Parsed::Binary(binary) => Some(binary),
            _ => None,
        }
    }

    pub fn into_fat(self) -> Option<FatBinary> {
        match self {
            Parsed::Fat(fat) => Some(fat),
            _ => None,
        }
    }
}

/// Parse a file with the default configuration.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Parsed> {
    parse_with(path, &EngineConfig::default())
}

pub fn parse_with<P: AsRef<Path>>(path: P, config: &EngineConfig) -> Result<Parsed> {
    let path = path.as_ref();
    let _span = crate::span_trace!("parse", path = %path.display()).entered();
    let data = crate::io::read_image(path, &config.io)?;
    parse_bytes(&data, &config.parse)
}

/// Parse an in-memory image. The input is never modified.
pub fn parse_bytes(data: &[u8], config: &ParseConfig) -> Result<Parsed> {
    let format = detect(data);
    crate::log_debug!(format = %format, size = data.len(), "Detected format");

    let parsed = match format {
        Format::ELF => Parsed::Binary(ElfBinary::parse(data, config)?.into()),
        Format::PE => Parsed::Binary(PeBinary::parse(data, config)?.into()),
        Format::MachO if macho::is_fat(data) => Parsed::Fat(FatBinary::parse(data, config)?),
        Format::MachO => Parsed::Binary(macho::MachOBinary::parse(data, config)?.into()),
        Format::Unknown => {
            crate::log_info!(size = data.len(), "Unrecognized format");
            Parsed::Unrecognized
        }
    };
    Ok(parsed)
}

/// Parse a file that must hold a single recognized image.
///
/// A fat Mach-O with exactly one slice is unwrapped; more slices, or an
/// unknown format, give [`Error::FormatUnrecognized`].
pub fn parse_binary<P: AsRef<Path>>(path: P) -> Result<Binary> {
    match parse(path)? {
        Parsed::Binary(binary) => Ok(binary),
        Parsed::Fat(mut fat) if fat.size() == 1 => {
            fat.take(0).map(Binary::from).ok_or(Error::FormatUnrecognized)
        }
        _ => Err(crate::log_error!(Error::FormatUnrecognized)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binary::GenericBinary;
    use crate::formats::macho::fat::tests::fat_sample;
    use crate::formats::macho::tests::sample;

    #[test]
    fn test_dispatch() {
        let config = ParseConfig::default();

        let parsed = parse_bytes(&sample(), &config).unwrap();
        assert_eq!(parsed.format(), Format::MachO);
        let binary = parsed.into_binary().unwrap();
        assert!(binary.as_macho().is_some());
        assert!(binary.as_elf().is_none());

        let parsed = parse_bytes(&fat_sample(), &config).unwrap();
        assert_eq!(parsed.into_fat().unwrap().size(), 2);

        let parsed = parse_bytes(b"plain text, not a binary", &config).unwrap();
        assert!(matches!(parsed, Parsed::Unrecognized));
        assert_eq!(parsed.format(), Format::Unknown);
    }

    #[test]
    fn test_parse_errors_propagate() {
        let data = sample();
        assert!(matches!(
            parse_bytes(&data[..0x1800], &ParseConfig::default()),
            Err(Error::MachO(_))
        ));
    }

    #[test]
    fn test_parse_binary_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let thin = dir.path().join("thin");
        std::fs::write(&thin, sample()).unwrap();
        assert_eq!(parse_binary(&thin).unwrap().format(), Format::MachO);

        let fat = dir.path().join("fat");
        std::fs::write(&fat, fat_sample()).unwrap();
        assert!(matches!(parse_binary(&fat), Err(Error::FormatUnrecognized)));

        let junk = dir.path().join("junk");
        std::fs::write(&junk, b"junk").unwrap();
        assert!(matches!(parse_binary(&junk), Err(Error::FormatUnrecognized)));
    }
}
