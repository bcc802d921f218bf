//! ELF serialization
//!
//! Regions keep their file offsets unless an earlier region grew into them.
//! Allocated sections and the program header table are pinned: moving them
//! would break the address layout the program headers describe.

use super::headers::encode_header;
use super::sections::encode_section_header;
use super::segments::encode_program_header;
use super::ElfBinary;
use crate::config::WriteConfig;
use crate::core::section::Section;
use crate::core::translate;
use crate::error::{Error, Result};
use crate::formats::bytes::{align_up, zero_range, ByteSink, WriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Section(usize),
    HeaderTable,
    ProgramHeaders,
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    slot: Slot,
    old_offset: u64,
    old_size: u64,
    new_offset: u64,
    new_size: u64,
    align: u64,
}

impl Placement {
    fn changed(&self) -> bool {
        self.old_offset != self.new_offset || self.old_size != self.new_size
    }
}

/// Compute new offsets for every file-backed region, in original order.
fn plan(elf: &ElfBinary) -> Result<Vec<Placement>> {
    let class = elf.header.class();
    let mut regions: Vec<Placement> = elf
        .sections
        .iter()
        .enumerate()
        .filter(|(_, s)| s.has_file_data())
        .map(|(i, s)| Placement {
            slot: Slot::Section(i),
            old_offset: s.header.sh_offset,
            old_size: s.original_size(),
            new_offset: s.header.sh_offset,
            new_size: s.content().len() as u64,
            align: s.alignment().max(1),
        })
        .collect();

    if elf.header.e_shoff != 0 && !elf.sections.is_empty() {
        let size = (elf.sections.len() * class.shdr_size()) as u64;
        regions.push(Placement {
            slot: Slot::HeaderTable,
            old_offset: elf.header.e_shoff,
            old_size: size,
            new_offset: elf.header.e_shoff,
            new_size: size,
            align: if class.is_64() { 8 } else { 4 },
        });
    }
    if elf.header.e_phoff != 0 && !elf.segments.is_empty() {
        let size = (elf.segments.len() * class.phdr_size()) as u64;
        regions.push(Placement {
            slot: Slot::ProgramHeaders,
            old_offset: elf.header.e_phoff,
            old_size: size,
            new_offset: elf.header.e_phoff,
            new_size: size,
            align: if class.is_64() { 8 } else { 4 },
        });
    }
    regions.sort_by_key(|r| r.old_offset);

    let mut cursor = 0u64;
    for region in regions.iter_mut() {
        if cursor > region.old_offset {
            region.new_offset = align_up(cursor, region.align);
        }
        if region.changed() {
            cursor = cursor.max(region.new_offset + region.new_size);
        }
    }

    for region in &regions {
        let i = match region.slot {
            Slot::Section(i) => i,
            Slot::ProgramHeaders if region.changed() => {
                return Err(crate::log_error!(Error::Layout(format!(
                    "program headers at {:#x} are overrun by a grown region",
                    region.old_offset
                ))));
            }
            _ => continue,
        };
        let section = &elf.sections[i];
        if !section.is_allocated() {
            continue;
        }
        if region.new_offset != region.old_offset {
            return Err(crate::log_error!(Error::Layout(format!(
                "allocated section {} would move from {:#x} to {:#x}",
                section.name(),
                region.old_offset,
                region.new_offset
            ))));
        }
        if region.new_size > region.old_size {
            return Err(crate::log_error!(Error::Layout(format!(
                "allocated section {} grew from {:#x} to {:#x} bytes",
                section.name(),
                region.old_size,
                region.new_size
            ))));
        }
    }

    Ok(regions)
}

pub(super) fn build(elf: &ElfBinary, config: &WriteConfig) -> Result<Vec<u8>> {
    let _span = crate::span_trace!("build_elf").entered();

    if config.check_entrypoint && elf.header.e_entry != 0 {
        translate::va_to_offset(elf, elf.header.e_entry).map_err(|_| {
            crate::log_error!(Error::Layout(format!(
                "entrypoint {:#x} is not backed by any segment",
                elf.header.e_entry
            )))
        })?;
    }

    let regions = plan(elf)?;
    let class = elf.header.class();
    let endian = elf.header.endian();

    let mut out = elf.image.clone();
    for region in regions.iter().filter(|r| r.changed()) {
        zero_range(
            &mut out,
            region.old_offset as usize,
            (region.old_offset + region.old_size) as usize,
        );
        crate::log_debug!(
            old_offset = region.old_offset,
            new_offset = region.new_offset,
            new_size = region.new_size,
            "Relocating region"
        );
    }

    let end = regions
        .iter()
        .map(|r| r.new_offset + r.new_size)
        .max()
        .unwrap_or(0) as usize;
    if end > out.len() {
        out.resize(end, 0);
    }

    let mut header = elf.header;
    let mut section_headers: Vec<_> = elf.sections.iter().map(|s| s.header).collect();
    for region in &regions {
        match region.slot {
            Slot::Section(i) => {
                section_headers[i].sh_offset = region.new_offset;
                section_headers[i].sh_size = region.new_size;
                let _ = out.write_slice_at(region.new_offset as usize, elf.sections[i].content());
            }
            Slot::HeaderTable => header.e_shoff = region.new_offset,
            // Re-encoded below at its pinned offset.
            Slot::ProgramHeaders => {}
        }
    }
    // NOBITS sizes are not file regions but still follow the model.
    for (sh, section) in section_headers.iter_mut().zip(&elf.sections) {
        if !section.has_file_data() {
            sh.sh_size = section.size();
        }
    }

    if header.e_shoff != 0 && !section_headers.is_empty() {
        let mut sink = ByteSink::with_capacity(endian, section_headers.len() * class.shdr_size());
        for sh in &section_headers {
            encode_section_header(&mut sink, sh, class);
        }
        let _ = out.write_slice_at(header.e_shoff as usize, &sink.into_inner());
    }

    if header.e_phoff != 0 && !elf.segments.is_empty() {
        let mut sink = ByteSink::with_capacity(endian, elf.segments.len() * class.phdr_size());
        for segment in &elf.segments {
            encode_program_header(&mut sink, &segment.header, class);
        }
        let _ = out.write_slice_at(header.e_phoff as usize, &sink.into_inner());
    }

    let _ = out.write_slice_at(0, &encode_header(&header));
    out.extend_from_slice(&elf.overlay);

    crate::log_debug!(size = out.len(), overlay = elf.overlay.len(), "Built ELF image");
    Ok(out)
}
