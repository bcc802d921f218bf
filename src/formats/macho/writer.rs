//! Mach-O slice serialization
//!
//! Section data is written back in place and never moves. The header and
//! load commands are re-encoded into the space in front of the first byte of
//! section or segment data.

use super::commands::{encode_load_command, LoadCommand};
use super::header::encode_header;
use super::MachOBinary;
use crate::config::WriteConfig;
use crate::core::section::Section;
use crate::core::translate;
use crate::error::{Error, Result};
use crate::formats::bytes::{zero_range, ByteSink, WriteExt};

/// First file offset the command area must not reach.
fn command_limit(macho: &MachOBinary) -> u64 {
    let sections = macho
        .sections()
        .into_iter()
        .filter(|s| s.has_file_data())
        .map(|s| s.header.offset as u64);
    let segments = macho
        .segments()
        .into_iter()
        .filter(|s| s.fileoff > 0 && s.filesize > 0)
        .map(|s| s.fileoff);
    sections
        .chain(segments)
        .min()
        .unwrap_or(macho.image.len() as u64)
}

pub(super) fn build(macho: &MachOBinary, config: &WriteConfig) -> Result<Vec<u8>> {
    let _span = crate::span_trace!("build_macho", ncmds = macho.commands.len()).entered();

    let entry = macho.entry_address().unwrap_or(0);
    if config.check_entrypoint && entry != 0 {
        translate::va_to_offset(macho, entry).map_err(|_| {
            crate::log_error!(Error::Layout(format!(
                "entrypoint {entry:#x} is not backed by any section or segment"
            )))
        })?;
    }

    let mut header = macho.header;
    header.ncmds = macho.commands.len() as u32;
    header.sizeofcmds = macho.commands.iter().map(LoadCommand::cmdsize).sum();

    let mut sink = ByteSink::with_capacity(header.endian(), header.sizeofcmds as usize);
    for command in &macho.commands {
        encode_load_command(&mut sink, command);
    }
    let commands = sink.into_inner();

    let start = header.size();
    let end = start + commands.len();
    let limit = command_limit(macho);
    if end as u64 > limit {
        return Err(crate::log_error!(Error::Layout(format!(
            "load commands end at {end:#x}, past the first data at {limit:#x}"
        ))));
    }

    let mut out = macho.image.clone();
    zero_range(&mut out, start, start + macho.command_area.max(commands.len()));
    let written = out
        .write_slice_at(0, &encode_header(&header))
        .and_then(|_| out.write_slice_at(start, &commands));
    if written.is_none() {
        return Err(crate::log_error!(Error::Layout(
            "image too small for the header and load commands".to_string()
        )));
    }

    let mut starts: Vec<u64> = macho
        .sections()
        .into_iter()
        .filter(|s| s.has_file_data())
        .map(|s| s.header.offset as u64)
        .collect();
    starts.sort_unstable();

    for seg in macho.segments() {
        for section in seg.sections().iter().filter(|s| s.has_file_data()) {
            let offset = section.header.offset as u64;
            let content = section.content();
            let segment_room = seg.file_end().saturating_sub(offset);
            if content.len() as u64 > segment_room {
                return Err(crate::log_error!(Error::Layout(format!(
                    "section {} needs {:#x} bytes but segment {} leaves {:#x}",
                    section.name(),
                    content.len(),
                    seg.name(),
                    segment_room
                ))));
            }
            // Sections never move, so growth stops at the next one.
            if let Some(&next) = starts.iter().find(|&&start| start > offset) {
                if offset + content.len() as u64 > next {
                    return Err(crate::log_error!(Error::Layout(format!(
                        "section {} grows to {:#x} bytes over the section at {:#x}",
                        section.name(),
                        content.len(),
                        next
                    ))));
                }
            }
            let offset = offset as usize;
            zero_range(&mut out, offset, offset + section.header.size as usize);
            if out.write_slice_at(offset, content).is_none() {
                return Err(crate::log_error!(Error::Layout(format!(
                    "section {} runs past the end of the image",
                    section.name()
                ))));
            }
        }
    }

    crate::log_debug!(
        size = out.len(),
        sizeofcmds = header.sizeofcmds,
        "Serialized Mach-O slice"
    );
    Ok(out)
}
