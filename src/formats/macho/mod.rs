//! Mach-O support, thin and fat
//!
//! A [`MachOBinary`] is one architecture slice. It owns the slice bytes and
//! the load commands in file order; segments carry their sections, every
//! other command stays raw. [`FatBinary`] holds the slices of a universal
//! file, or a single slice for a thin input.

pub mod commands;
mod extend;
pub mod fat;
pub mod header;
pub mod relocations;
pub mod symbols;
pub mod types;
mod writer;

use crate::config::{EngineConfig, ParseConfig, WriteConfig};
use crate::core::binary::{Format, GenericBinary, Header, ObjectType};
use crate::core::relocation::Relocation;
use crate::core::section::Section;
use crate::core::segment::Segment;
use crate::core::symbol::Symbol;
use crate::core::translate::{self, AddressSpace, Mapping, Region};
use crate::formats::bytes::{Endian, WriteExt};
pub use commands::{LoadCommand, MachSection, RawCommand, SegmentCommand};
pub use fat::FatBinary;
pub use header::{HeaderFlags, MachHeader};
use std::path::Path;
pub use types::*;

/// True for a universal (fat) envelope rather than a thin image.
pub fn is_fat(data: &[u8]) -> bool {
    fat::fat_layout(data).is_some()
}

/// Read a Mach-O file. Thin inputs come back as a one-slice [`FatBinary`].
pub fn parse<P: AsRef<Path>>(path: P) -> crate::error::Result<FatBinary> {
    parse_with(path, &EngineConfig::default())
}

pub fn parse_with<P: AsRef<Path>>(
    path: P,
    config: &EngineConfig,
) -> crate::error::Result<FatBinary> {
    let data = crate::io::read_image(path, &config.io)?;
    Ok(FatBinary::parse(&data, &config.parse)?)
}

/// One parsed Mach-O image.
#[derive(Debug, Clone)]
pub struct MachOBinary {
    header: MachHeader,
    commands: Vec<LoadCommand>,
    symbols: Vec<Nlist>,
    /// The whole slice as read, kept in step with mutations.
    image: Vec<u8>,
    /// Bytes after the header that held commands at parse time.
    command_area: usize,
}

impl MachOBinary {
    pub fn parse(data: &[u8], config: &ParseConfig) -> Result<Self> {
        let _span = crate::span_trace!("parse_macho", size = data.len()).entered();

        let header = header::parse_header(data)?;
        let endian = header.endian();
        let mut commands =
            commands::parse_load_commands(data, &header, config.max_load_commands)?;

        if config.parse_relocations {
            let mut total = 0usize;
            for seg in commands.iter_mut().filter_map(LoadCommand::as_segment_mut) {
                for section in seg.sections_mut() {
                    let (reloff, nreloc) = (section.header.reloff, section.header.nreloc);
                    if nreloc == 0 {
                        continue;
                    }
                    total += nreloc as usize;
                    if total > config.max_relocations {
                        return Err(MachOError::LimitExceeded("relocation count"));
                    }
                    section.set_relocations(relocations::parse_relocations(
                        data, reloff, nreloc, endian,
                    )?);
                }
            }
        }

        let symbols = match commands.iter().find(|c| c.cmd() == LC_SYMTAB) {
            Some(LoadCommand::Other(symtab)) if config.parse_symbols => symbols::parse_symtab(
                data,
                symtab,
                endian,
                header.is_64(),
                config.max_symbols,
            )?,
            _ => Vec::new(),
        };

        crate::log_debug!(
            ncmds = commands.len(),
            segments = commands.iter().filter(|c| c.as_segment().is_some()).count(),
            symbols = symbols.len(),
            "Parsed Mach-O"
        );

        Ok(Self {
            command_area: header.sizeofcmds as usize,
            header,
            commands,
            symbols,
            image: data.to_vec(),
        })
    }

    pub fn mach_header(&self) -> &MachHeader {
        &self.header
    }

    pub fn mach_header_mut(&mut self) -> &mut MachHeader {
        &mut self.header
    }

    pub fn commands(&self) -> &[LoadCommand] {
        &self.commands
    }

    /// Segment commands in load-command order.
    pub fn segments(&self) -> Vec<&SegmentCommand> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .collect()
    }

    pub fn get_segment(&self, name: &str) -> Option<&SegmentCommand> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .find(|s| s.name() == name)
    }

    pub fn get_segment_mut(&mut self, name: &str) -> Option<&mut SegmentCommand> {
        self.commands
            .iter_mut()
            .filter_map(LoadCommand::as_segment_mut)
            .find(|s| s.name() == name)
    }

    /// Every section of every segment, in command order.
    pub fn sections(&self) -> Vec<&MachSection> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .flat_map(|s| s.sections())
            .collect()
    }

    pub fn get_section(&self, name: &str) -> Option<&MachSection> {
        self.sections().into_iter().find(|s| s.name() == name)
    }

    pub fn get_section_mut(&mut self, name: &str) -> Option<&mut MachSection> {
        self.commands
            .iter_mut()
            .filter_map(LoadCommand::as_segment_mut)
            .flat_map(|s| s.sections_mut().iter_mut())
            .find(|s| s.name() == name)
    }

    pub fn symbol_entries(&self) -> &[Nlist] {
        &self.symbols
    }

    pub fn has_code_signature(&self) -> bool {
        self.commands.iter().any(|c| c.cmd() == LC_CODE_SIGNATURE)
    }

    /// `(dataoff, datasize)` of the code signature blob.
    pub fn code_signature(&self) -> Option<(u32, u32)> {
        let endian = self.header.endian();
        let raw = self
            .commands
            .iter()
            .find(|c| c.cmd() == LC_CODE_SIGNATURE)?
            .as_raw()?;
        Some((raw.u32_at(8, endian)?, raw.u32_at(12, endian)?))
    }

    /// Size of the slice once written.
    pub fn image_len(&self) -> usize {
        self.image.len()
    }

    fn section_at(&self, index: usize) -> Option<&MachSection> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .flat_map(|s| s.sections())
            .nth(index)
    }

    fn section_at_mut(&mut self, index: usize) -> Option<&mut MachSection> {
        self.commands
            .iter_mut()
            .filter_map(LoadCommand::as_segment_mut)
            .flat_map(|s| s.sections_mut().iter_mut())
            .nth(index)
    }

    fn segment_at(&self, index: usize) -> Option<&SegmentCommand> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .nth(index)
    }

    /// Address of the entry from LC_MAIN or the LC_UNIXTHREAD pc.
    fn entry_address(&self) -> Option<u64> {
        let endian = self.header.endian();
        for command in &self.commands {
            match command {
                LoadCommand::Other(raw) if raw.cmd == LC_MAIN => {
                    let entryoff = raw.u64_at(8, endian)?;
                    return Some(self.get_segment("__TEXT")?.vmaddr + entryoff);
                }
                LoadCommand::Other(raw) if raw.cmd == LC_UNIXTHREAD => {
                    // Offsets of the pc register from the start of the command.
                    return match self.header.cputype {
                        cpu_type::X86_64 => raw.u64_at(144, endian),
                        cpu_type::ARM64 => raw.u64_at(272, endian),
                        cpu_type::X86 => raw.u32_at(56, endian).map(u64::from),
                        cpu_type::ARM => raw.u32_at(76, endian).map(u64::from),
                        _ => None,
                    };
                }
                _ => {}
            }
        }
        None
    }

    fn object_type(&self) -> ObjectType {
        match self.header.filetype {
            MH_EXECUTE => ObjectType::Executable,
            MH_DYLIB | MH_BUNDLE | MH_DYLIB_STUB | MH_KEXT_BUNDLE => ObjectType::Library,
            MH_OBJECT => ObjectType::Object,
            MH_CORE => ObjectType::Core,
            _ => ObjectType::Unknown,
        }
    }

    fn endian(&self) -> Endian {
        self.header.endian()
    }
}

impl AddressSpace for MachOBinary {
    fn mappings(&self) -> Vec<Mapping> {
        let sections = self
            .commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .flat_map(|s| s.sections())
            .enumerate()
            .filter(|(_, s)| s.has_file_data())
            .map(|(i, s)| Mapping {
                region: Region::Section(i),
                virtual_address: s.header.addr,
                file_offset: s.header.offset as u64,
                size: s.content().len() as u64,
            });
        let segments = self
            .commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .enumerate()
            .filter(|(_, s)| s.filesize > 0)
            .map(|(i, s)| Mapping {
                region: Region::Segment(i),
                virtual_address: s.vmaddr,
                file_offset: s.fileoff,
                size: s.filesize.min(s.vmsize),
            });
        sections.chain(segments).collect()
    }

    fn region_bytes(&self, region: Region, delta: u64) -> Option<&[u8]> {
        match region {
            Region::Section(i) => self.section_at(i)?.content().get(delta as usize..),
            Region::Segment(i) => {
                let seg = self.segment_at(i)?;
                let start = seg.fileoff.checked_add(delta)? as usize;
                self.image.get(start..seg.file_end() as usize)
            }
        }
    }

    fn write_region(&mut self, region: Region, delta: u64, bytes: &[u8]) {
        match region {
            Region::Section(i) => {
                let Some(section) = self.section_at_mut(i) else {
                    return;
                };
                let start = delta as usize;
                section.content_mut()[start..start + bytes.len()].copy_from_slice(bytes);

                let (offset, original) = (section.header.offset as u64, section.header.size);
                if delta < original {
                    let n = bytes.len().min((original - delta) as usize);
                    let _ = self
                        .image
                        .write_slice_at((offset + delta) as usize, &bytes[..n]);
                }
            }
            Region::Segment(i) => {
                let Some(offset) = self.segment_at(i).map(|s| s.fileoff + delta) else {
                    return;
                };
                let _ = self.image.write_slice_at(offset as usize, bytes);
                for seg in self
                    .commands
                    .iter_mut()
                    .filter_map(LoadCommand::as_segment_mut)
                {
                    translate::write_through(seg.sections_mut(), offset, bytes);
                }
            }
        }
    }
}

impl GenericBinary for MachOBinary {
    fn format(&self) -> Format {
        Format::MachO
    }

    fn header(&self) -> Header {
        Header {
            architecture: arch_for(self.header.cputype),
            endianness: self.endian().into(),
            entrypoint: self.entrypoint(),
            object_type: self.object_type(),
            bits: if self.header.is_64() { 64 } else { 32 },
        }
    }

    fn entrypoint(&self) -> u64 {
        self.entry_address().unwrap_or(0)
    }

    fn is_pie(&self) -> bool {
        self.header.has_flag(HeaderFlags::PIE)
    }

    fn has_nx(&self) -> bool {
        !self.header.has_flag(HeaderFlags::ALLOW_STACK_EXECUTION)
    }

    fn sections(&self) -> Vec<&dyn Section> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .flat_map(|s| s.sections())
            .map(|s| s as &dyn Section)
            .collect()
    }

    fn sections_mut(&mut self) -> Vec<&mut dyn Section> {
        self.commands
            .iter_mut()
            .filter_map(LoadCommand::as_segment_mut)
            .flat_map(|s| s.sections_mut().iter_mut())
            .map(|s| s as &mut dyn Section)
            .collect()
    }

    /// Symbol table entries without debugger stabs.
    fn symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .filter(|s| !s.is_stab())
            .map(|s| Symbol::new(s.name.clone(), s.n_value, 0))
            .collect()
    }

    fn relocations(&self) -> Vec<Relocation> {
        self.sections()
            .into_iter()
            .flat_map(|section| {
                let base = section.header.addr;
                section.relocations().iter().map(move |r| Relocation {
                    address: base + r.address as u64,
                    size: r.size(),
                })
            })
            .collect()
    }

    fn segments(&self) -> Vec<Segment> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .map(SegmentCommand::to_segment)
            .collect()
    }

    fn build_with(&self, config: &WriteConfig) -> crate::error::Result<Vec<u8>> {
        writer::build(self, config)
    }
}
