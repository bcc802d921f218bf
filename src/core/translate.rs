//! Virtual address to file offset translation.
//!
//! A binary describes its address space as an ordered list of [`Mapping`]s:
//! sections first in table order, then segments for the bytes no section
//! covers. The first mapping containing an address wins, so overlapping
//! sections resolve to whichever comes first in the section table.

use crate::core::section::Section;
use crate::error::{Error, Result};

/// Which table entry a mapping came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Section(usize),
    Segment(usize),
}

/// A file-backed virtual range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub region: Region,
    pub virtual_address: u64,
    pub file_offset: u64,
    pub size: u64,
}

impl Mapping {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.virtual_address && address - self.virtual_address < self.size
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset - self.file_offset < self.size
    }
}

/// An address resolved to a mapping and a distance into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub mapping: Mapping,
    pub delta: u64,
}

impl Resolved {
    pub fn file_offset(&self) -> u64 {
        self.mapping.file_offset + self.delta
    }

    /// Bytes left in the mapping from the resolved address.
    pub fn available(&self) -> u64 {
        self.mapping.size - self.delta
    }
}

/// The seam every format implements to take part in translation and patching.
pub trait AddressSpace {
    /// Ordered, file-backed ranges. Sections come before segments.
    fn mappings(&self) -> Vec<Mapping>;

    /// Bring a caller-supplied address into the space `mappings` uses.
    fn normalize_address(&self, address: u64) -> u64 {
        address
    }

    /// Bytes of a mapped region starting `delta` bytes in.
    fn region_bytes(&self, region: Region, delta: u64) -> Option<&[u8]>;

    /// Store `bytes` at `delta` into a region. Bounds were checked by the caller.
    fn write_region(&mut self, region: Region, delta: u64, bytes: &[u8]);
}

/// First mapping containing `address`.
pub fn resolve<A: AddressSpace + ?Sized>(space: &A, address: u64) -> Result<Resolved> {
    let normalized = space.normalize_address(address);
    space
        .mappings()
        .into_iter()
        .find(|m| m.contains(normalized))
        .map(|mapping| Resolved {
            mapping,
            delta: normalized - mapping.virtual_address,
        })
        .ok_or(Error::AddressOutOfRange { address })
}

pub fn va_to_offset<A: AddressSpace + ?Sized>(space: &A, address: u64) -> Result<u64> {
    resolve(space, address).map(|r| r.file_offset())
}

pub fn offset_to_va<A: AddressSpace + ?Sized>(space: &A, offset: u64) -> Option<u64> {
    space
        .mappings()
        .into_iter()
        .find(|m| m.contains_offset(offset))
        .map(|m| m.virtual_address + (offset - m.file_offset))
}

/// Read `len` bytes at `address` from a single mapping.
pub fn read<A: AddressSpace + ?Sized>(space: &A, address: u64, len: usize) -> Result<Vec<u8>> {
    let resolved = resolve(space, address)?;
    if len as u64 > resolved.available() {
        return Err(Error::AddressOutOfRange {
            address: address + resolved.available(),
        });
    }
    space
        .region_bytes(resolved.mapping.region, resolved.delta)
        .and_then(|bytes| bytes.get(..len))
        .map(|bytes| bytes.to_vec())
        .ok_or(Error::AddressOutOfRange { address })
}

/// Overwrite bytes at `address`. Nothing is written unless the whole patch fits.
pub fn patch<A: AddressSpace + ?Sized>(space: &mut A, address: u64, bytes: &[u8]) -> Result<()> {
    let resolved = resolve(space, address)?;
    let available = resolved.available();
    let backed = space
        .region_bytes(resolved.mapping.region, resolved.delta)
        .map_or(0, |b| b.len() as u64);
    if bytes.len() as u64 > available.min(backed) {
        return Err(crate::log_error!(Error::WriteOverflow {
            address,
            len: bytes.len(),
            available: available.min(backed),
        }));
    }

    crate::log_debug!(
        address = address,
        offset = resolved.file_offset(),
        len = bytes.len(),
        "Patching bytes"
    );
    space.write_region(resolved.mapping.region, resolved.delta, bytes);
    Ok(())
}

/// Mirror a raw write at file `offset` into every section overlapping it.
pub fn write_through<S: Section>(sections: &mut [S], offset: u64, bytes: &[u8]) {
    let end = offset + bytes.len() as u64;
    for section in sections.iter_mut().filter(|s| s.has_file_data()) {
        let start = section.file_offset();
        let stop = start + section.content().len() as u64;
        let lo = offset.max(start);
        let hi = end.min(stop);
        if lo >= hi {
            continue;
        }
        let src = &bytes[(lo - offset) as usize..(hi - offset) as usize];
        section.content_mut()[(lo - start) as usize..(hi - start) as usize].copy_from_slice(src);
    }
}
