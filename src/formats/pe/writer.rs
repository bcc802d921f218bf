//! PE serialization
//!
//! Raw data keeps its file position unless an earlier section grew into it;
//! displaced sections move to the next file-alignment boundary. Virtual
//! addresses never move, so a section whose memory footprint reaches the next
//! one is rejected.

use super::headers::{encode_coff_header, encode_optional_header};
use super::sections::encode_section_header;
use super::types::*;
use super::utils::calculate_pe_checksum;
use super::PeBinary;
use crate::config::WriteConfig;
use crate::core::section::Section;
use crate::core::translate;
use crate::error::{Error, Result};
use crate::formats::bytes::{align_up, zero_range, ByteSink, Endian, WriteExt};
use sha2::{Digest, Sha256};

/// Offset of `CheckSum` within the optional header, same for both flavors.
const CHECKSUM_FIELD: usize = 64;

#[derive(Debug, Clone, Copy)]
struct RawPlacement {
    index: usize,
    old_offset: u32,
    old_size: u32,
    new_offset: u32,
    new_size: u32,
}

impl RawPlacement {
    fn changed(&self) -> bool {
        self.old_offset != self.new_offset || self.old_size != self.new_size
    }
}

/// The loader's footprint: a zero virtual size means the raw size is used.
fn memory_size(section: &super::PeSection) -> u64 {
    match section.header.virtual_size {
        0 => section.content().len() as u64,
        size => size as u64,
    }
}

fn check_virtual_layout(pe: &PeBinary) -> Result<()> {
    let mut order: Vec<_> = pe.sections.iter().collect();
    order.sort_by_key(|s| s.header.virtual_address);
    for pair in order.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let end = prev.header.virtual_address as u64 + memory_size(prev);
        if end > next.header.virtual_address as u64 {
            return Err(crate::log_error!(Error::Layout(format!(
                "section {} ends at RVA {:#x}, past the start of {} at {:#x}",
                prev.name(),
                end,
                next.name(),
                next.header.virtual_address
            ))));
        }
    }
    Ok(())
}

fn plan(pe: &PeBinary) -> Vec<RawPlacement> {
    let file_alignment = pe.optional.file_alignment().max(1) as u64;
    let mut raws: Vec<RawPlacement> = pe
        .sections
        .iter()
        .enumerate()
        // Placement follows the parsed header, so emptied sections still get a slot.
        .filter(|(_, s)| s.header.pointer_to_raw_data != 0)
        .map(|(index, s)| {
            let len = s.content().len() as u32;
            let old_size = s.header.size_of_raw_data;
            // Untouched lengths keep their recorded size, alignment quirks included.
            let new_size = if len == old_size {
                old_size
            } else {
                align_up(len as u64, file_alignment) as u32
            };
            RawPlacement {
                index,
                old_offset: s.header.pointer_to_raw_data,
                old_size,
                new_offset: s.header.pointer_to_raw_data,
                new_size,
            }
        })
        .collect();
    raws.sort_by_key(|r| r.old_offset);

    let mut cursor = 0u64;
    for raw in raws.iter_mut() {
        if raw.new_size == 0 {
            // No raw data left: PointerToRawData goes to zero as well.
            raw.new_offset = 0;
            continue;
        }
        if cursor > raw.old_offset as u64 {
            raw.new_offset = align_up(cursor, file_alignment) as u32;
        }
        if raw.changed() {
            cursor = cursor.max(raw.new_offset as u64 + raw.new_size as u64);
        }
    }
    raws
}

pub(super) fn build(pe: &PeBinary, config: &WriteConfig) -> Result<Vec<u8>> {
    let _span = crate::span_trace!("build_pe").entered();

    let entry = pe.optional.addressof_entrypoint();
    if config.check_entrypoint && entry != 0 {
        translate::va_to_offset(pe, entry as u64).map_err(|_| {
            crate::log_error!(Error::Layout(format!(
                "entrypoint RVA {entry:#x} is not backed by any section"
            )))
        })?;
    }
    check_virtual_layout(pe)?;

    let raws = plan(pe);
    let old_end = pe.image.len() as u64;
    let mut out = pe.image.clone();

    for raw in raws.iter().filter(|r| r.changed()) {
        zero_range(
            &mut out,
            raw.old_offset as usize,
            (raw.old_offset as u64 + raw.old_size as u64) as usize,
        );
        crate::log_debug!(
            section = pe.sections[raw.index].name(),
            old_offset = raw.old_offset,
            new_offset = raw.new_offset,
            new_size = raw.new_size,
            "Relocating raw data"
        );
    }

    let end = raws
        .iter()
        .map(|r| r.new_offset as u64 + r.new_size as u64)
        .max()
        .unwrap_or(0)
        .max(old_end) as usize;
    out.resize(end, 0);

    let mut headers: Vec<SectionHeader> = pe.sections.iter().map(|s| s.header).collect();
    for raw in &raws {
        let start = raw.new_offset as usize;
        zero_range(&mut out, start, start + raw.new_size as usize);
        let _ = out.write_slice_at(start, pe.sections[raw.index].content());
        headers[raw.index].pointer_to_raw_data = raw.new_offset;
        headers[raw.index].size_of_raw_data = raw.new_size;
    }

    let growth = end as u64 - old_end;
    let mut coff = pe.coff;
    coff.number_of_sections = pe.sections.len() as u16;
    if coff.pointer_to_symbol_table as u64 >= old_end {
        coff.pointer_to_symbol_table += growth as u32;
    }

    let mut optional = pe.optional.clone();
    let section_alignment = optional.section_alignment().max(1) as u64;
    let image_end = pe
        .sections
        .iter()
        .map(|s| s.header.virtual_address as u64 + memory_size(s))
        .max()
        .unwrap_or(0);
    let needed = align_up(image_end, section_alignment) as u32;
    optional.windows.size_of_image = optional.windows.size_of_image.max(needed);

    let mut directories = pe.data_directories.clone();
    if let Some(security) = directories.get_mut(IMAGE_DIRECTORY_ENTRY_SECURITY) {
        // A file offset, not an RVA; the blob lives in the overlay.
        if security.virtual_address != 0 && security.virtual_address as u64 >= old_end {
            security.virtual_address += growth as u32;
        }
    }

    let pe_offset = pe.dos.e_lfanew as usize;
    let opt_offset = pe_offset + 24;
    let table_offset = opt_offset + coff.size_of_optional_header as usize;
    let mut sink = ByteSink::with_capacity(Endian::Little, headers.len() * 40);
    for header in &headers {
        encode_section_header(&mut sink, header);
    }
    let _ = out.write_slice_at(table_offset, &sink.into_inner());
    let _ = out.write_slice_at(pe_offset + 4, &encode_coff_header(&coff));
    let _ = out.write_slice_at(opt_offset, &encode_optional_header(&optional, &directories));
    out.extend_from_slice(&pe.overlay);

    if config.recompute_pe_checksum && optional.checksum() != 0 {
        let digest: [u8; 32] = Sha256::digest(&out).into();
        if digest != pe.source_digest {
            let checksum = calculate_pe_checksum(&out, opt_offset + CHECKSUM_FIELD);
            let _ = out.write_u32_at(opt_offset + CHECKSUM_FIELD, checksum, Endian::Little);
            crate::log_debug!(checksum, "Recomputed PE checksum");
        }
    }

    crate::log_debug!(size = out.len(), overlay = pe.overlay.len(), "Built PE image");
    Ok(out)
}
