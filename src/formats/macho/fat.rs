//! Universal (fat) binaries
//!
//! The envelope is always big-endian on disk. Thin inputs are accepted too
//! and behave as a container with one slice, so callers handle both the
//! same way.

use super::header::thin_magic;
use super::types::*;
use super::MachOBinary;
use crate::config::ParseConfig;
use crate::core::binary::GenericBinary;
use crate::error::{Error, Result as EngineResult};
use crate::formats::bytes::{align_up, ByteSink, Endian, ReadExt};
use std::path::Path;

const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;
const FAT_ARCH_64_SIZE: usize = 32;

/// Byte order, width and slice count of a fat header.
///
/// `None` for anything that is not a fat envelope, including Java class
/// files that share the 32-bit magic.
pub(crate) fn fat_layout(data: &[u8]) -> Option<(Endian, bool, u32)> {
    let (endian, is_64) = match data.read_u32_at(0, Endian::Big)? {
        FAT_MAGIC => (Endian::Big, false),
        FAT_MAGIC_64 => (Endian::Big, true),
        FAT_CIGAM => (Endian::Little, false),
        FAT_CIGAM_64 => (Endian::Little, true),
        _ => return None,
    };
    let nfat = data.read_u32_at(4, endian)?;
    if !is_64 && nfat >= FAT_JAVA_THRESHOLD {
        return None;
    }
    Some((endian, is_64, nfat))
}

fn parse_arch(raw: &[u8], endian: Endian, is_64: bool) -> Option<FatArch> {
    let cputype = raw.read_u32_at(0, endian)?;
    let cpusubtype = raw.read_u32_at(4, endian)?;
    Some(if is_64 {
        FatArch {
            cputype,
            cpusubtype,
            offset: raw.read_u64_at(8, endian)?,
            size: raw.read_u64_at(16, endian)?,
            align: raw.read_u32_at(24, endian)?,
        }
    } else {
        FatArch {
            cputype,
            cpusubtype,
            offset: raw.read_u32_at(8, endian)? as u64,
            size: raw.read_u32_at(12, endian)? as u64,
            align: raw.read_u32_at(16, endian)?,
        }
    })
}

/// The slices of a universal file, or the single slice of a thin one.
///
/// Slices can be taken out; their positions stay empty so the indices of
/// the remaining ones do not change.
#[derive(Debug, Clone)]
pub struct FatBinary {
    slices: Vec<Option<MachOBinary>>,
    arches: Vec<FatArch>,
    is_64: bool,
    was_fat: bool,
}

impl FatBinary {
    pub fn parse(data: &[u8], config: &ParseConfig) -> Result<Self> {
        let Some((endian, is_64, nfat)) = fat_layout(data) else {
            let slice = MachOBinary::parse(data, config)?;
            let arch = FatArch {
                cputype: slice.mach_header().cputype,
                cpusubtype: slice.mach_header().cpusubtype,
                offset: 0,
                size: data.len() as u64,
                align: 0,
            };
            return Ok(Self {
                slices: vec![Some(slice)],
                arches: vec![arch],
                is_64: false,
                was_fat: false,
            });
        };

        let _span = crate::span_trace!("parse_fat", nfat).entered();
        if nfat > config.max_fat_arches {
            return Err(MachOError::LimitExceeded("fat architecture count"));
        }

        let entry_size = if is_64 { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE };
        let mut slices = Vec::with_capacity(nfat as usize);
        let mut arches = Vec::with_capacity(nfat as usize);
        for index in 0..nfat as usize {
            let at = FAT_HEADER_SIZE + index * entry_size;
            let arch = data
                .read_slice_at(at, entry_size)
                .and_then(|raw| parse_arch(raw, endian, is_64))
                .ok_or(MachOError::Truncated {
                    offset: at,
                    needed: entry_size,
                })?;
            let bytes = usize::try_from(arch.offset)
                .ok()
                .zip(usize::try_from(arch.size).ok())
                .and_then(|(offset, size)| data.read_slice_at(offset, size))
                .ok_or(MachOError::FatSliceOutOfBounds {
                    index,
                    offset: arch.offset,
                    size: arch.size,
                })?;
            if thin_magic(bytes).is_none() {
                return Err(MachOError::InvalidFatSlice {
                    index,
                    magic: bytes.read_u32_at(0, Endian::Big).unwrap_or(0),
                });
            }
            crate::log_debug!(
                index,
                cputype = arch.cputype,
                offset = arch.offset,
                size = arch.size,
                "Fat slice"
            );
            slices.push(Some(MachOBinary::parse(bytes, config)?));
            arches.push(arch);
        }

        Ok(Self {
            slices,
            arches,
            is_64,
            was_fat: true,
        })
    }

    /// Number of slice positions, taken ones included.
    pub fn size(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.iter().all(Option::is_none)
    }

    /// True when the input was a universal envelope.
    pub fn is_fat(&self) -> bool {
        self.was_fat
    }

    pub fn arches(&self) -> &[FatArch] {
        &self.arches
    }

    /// The slice at `index`, unless it is out of range or was taken.
    pub fn at(&self, index: usize) -> Option<&MachOBinary> {
        self.slices.get(index)?.as_ref()
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut MachOBinary> {
        self.slices.get_mut(index)?.as_mut()
    }

    /// Move a slice out. Its position stays and reports `None` afterwards.
    pub fn take(&mut self, index: usize) -> Option<MachOBinary> {
        self.slices.get_mut(index)?.take()
    }

    /// First slice for a CPU type.
    pub fn take_arch(&mut self, cputype: u32) -> Option<MachOBinary> {
        let index = self
            .slices
            .iter()
            .position(|s| matches!(s, Some(m) if m.mach_header().cputype == cputype))?;
        self.take(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachOBinary> {
        self.slices.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MachOBinary> {
        self.slices.iter_mut().flatten()
    }

    /// Serialize the remaining slices.
    ///
    /// A thin input with its slice still present is written thin. Otherwise
    /// slices keep their original offsets when those still fit and are
    /// pushed to the next aligned position when an earlier slice grew.
    pub fn build(&self) -> EngineResult<Vec<u8>> {
        let _span = crate::span_trace!("build_fat", slices = self.slices.len()).entered();

        let remaining: Vec<(&MachOBinary, &FatArch)> = self
            .slices
            .iter()
            .zip(&self.arches)
            .filter_map(|(slice, arch)| slice.as_ref().map(|s| (s, arch)))
            .collect();
        if remaining.is_empty() {
            return Err(crate::log_error!(Error::Layout(
                "fat binary has no slices left".to_string()
            )));
        }
        if !self.was_fat {
            return remaining[0].0.build();
        }

        let entry_size = if self.is_64 { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE };
        let mut built = Vec::with_capacity(remaining.len());
        let mut cursor = (FAT_HEADER_SIZE + remaining.len() * entry_size) as u64;
        for (slice, arch) in &remaining {
            let bytes = slice.build()?;
            let aligned = align_up(cursor, 1u64 << arch.align.min(31));
            let offset = if arch.offset >= aligned {
                arch.offset
            } else {
                aligned
            };
            if !self.is_64 && offset + bytes.len() as u64 > u32::MAX as u64 {
                return Err(crate::log_error!(Error::Layout(
                    "slice offset does not fit a 32-bit fat header".to_string()
                )));
            }
            cursor = offset + bytes.len() as u64;
            built.push((offset, bytes));
        }

        let mut header = ByteSink::new(Endian::Big);
        header
            .u32(if self.is_64 { FAT_MAGIC_64 } else { FAT_MAGIC })
            .u32(remaining.len() as u32);
        for ((_, arch), (offset, bytes)) in remaining.iter().zip(&built) {
            header
                .u32(arch.cputype)
                .u32(arch.cpusubtype)
                .addr(*offset, self.is_64)
                .addr(bytes.len() as u64, self.is_64)
                .u32(arch.align);
            if self.is_64 {
                header.u32(0);
            }
        }

        let mut out = header.into_inner();
        for (offset, bytes) in built {
            out.resize(offset as usize, 0);
            out.extend_from_slice(&bytes);
        }
        crate::log_debug!(size = out.len(), slices = remaining.len(), "Serialized fat binary");
        Ok(out)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> EngineResult<()> {
        let bytes = self.build()?;
        crate::io::write_image(path, &bytes)?;
        Ok(())
    }
}
