//! Segment growth and signature removal
//!
//! Both edits run on the model and keep the slice image in step with it, so a
//! later `build` only has to re-emit the header and commands.

use super::commands::{LoadCommand, RawCommand};
use super::types::*;
use super::MachOBinary;
use crate::formats::bytes::{zero_range, Endian};
use crate::io::IOLimits;

const LINKEDIT: &str = "__LINKEDIT";

/// A file offset stored inside a load command.
#[derive(Debug, Clone, Copy)]
enum OffsetField {
    U32(usize),
    U64(usize),
}

/// Fields of raw commands that hold absolute file offsets.
fn offset_fields(cmd: u32) -> &'static [OffsetField] {
    use OffsetField::{U32, U64};
    match cmd {
        LC_SYMTAB => &[U32(8), U32(16)],
        // tocoff, modtaboff, extrefsymoff, indirectsymoff, extreloff, locreloff
        LC_DYSYMTAB => &[U32(32), U32(40), U32(48), U32(56), U32(64), U32(72)],
        // rebase, bind, weak bind, lazy bind, export
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => &[U32(8), U32(16), U32(24), U32(32), U32(40)],
        LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => &[U32(8)],
        LC_NOTE => &[U64(24)],
        LC_MAIN => &[U64(8)],
        cmd if is_linkedit_data(cmd) => &[U32(8)],
        _ => &[],
    }
}

fn grow(value: u64, by: u64, what: &str) -> std::result::Result<u64, String> {
    value
        .checked_add(by)
        .ok_or_else(|| format!("{what} {value:#x} overflows when grown by {by:#x}"))
}

fn shift_u32(value: u32, from: u64, delta: u64) -> std::result::Result<u32, String> {
    if value == 0 || (value as u64) < from {
        return Ok(value);
    }
    u32::try_from(value as u64 + delta)
        .map_err(|_| format!("offset {value:#x} no longer fits in 32 bits"))
}

fn shift_raw(
    raw: &mut RawCommand,
    endian: Endian,
    from: u64,
    delta: u64,
) -> std::result::Result<(), String> {
    for field in offset_fields(raw.cmd) {
        match *field {
            OffsetField::U32(at) => {
                let Some(value) = raw.u32_at(at, endian) else {
                    continue;
                };
                let shifted = shift_u32(value, from, delta)?;
                raw.set_u32_at(at, shifted, endian);
            }
            OffsetField::U64(at) => {
                let Some(value) = raw.u64_at(at, endian) else {
                    continue;
                };
                if value != 0 && value >= from {
                    raw.set_u64_at(at, grow(value, delta, "offset")?, endian);
                }
            }
        }
    }
    Ok(())
}

impl MachOBinary {
    /// Drop LC_CODE_SIGNATURE and the blob it points at.
    ///
    /// Returns false when the binary carries no signature.
    pub fn remove_signature(&mut self) -> bool {
        let Some(index) = self
            .commands
            .iter()
            .position(|c| c.cmd() == LC_CODE_SIGNATURE)
        else {
            crate::log_debug!("No code signature to remove");
            return false;
        };
        let (dataoff, datasize) = self.code_signature().unwrap_or((0, 0));

        let removed = self.commands.remove(index);
        self.header.ncmds = self.header.ncmds.saturating_sub(1);
        self.header.sizeofcmds = self.header.sizeofcmds.saturating_sub(removed.cmdsize());

        let start = dataoff as u64;
        let end = start + datasize as u64;
        if datasize > 0 {
            if let Some(linkedit) = self.get_segment_mut(LINKEDIT) {
                if start >= linkedit.fileoff && end >= linkedit.file_end() {
                    linkedit.filesize = start - linkedit.fileoff;
                }
            }
            let len = self.image.len() as u64;
            if end >= len && start <= len {
                self.image.truncate(start as usize);
            } else {
                zero_range(&mut self.image, start as usize, end as usize);
            }
        }

        crate::log_info!(dataoff, datasize, "Removed code signature");
        true
    }

    /// Grow a segment's file size by exactly `size` bytes.
    ///
    /// Zero bytes are inserted at the end of the segment's file range, rounded
    /// up to the page size. Every later segment and file offset moves with
    /// them; only `__LINKEDIT` may also move in memory. On failure the binary
    /// is left untouched and false is returned, which includes growth that
    /// would take the slice past the default input size limit.
    pub fn extend_segment(&mut self, name: &str, size: u64) -> bool {
        let _span = crate::span_trace!("extend_segment", segment = name, size).entered();
        let mut next = self.clone();
        match next.try_extend_segment(name, size) {
            Ok(()) => {
                *self = next;
                crate::log_info!(segment = name, size, "Segment extended");
                true
            }
            Err(reason) => {
                crate::log_warn!(segment = name, reason = %reason, "Segment extension refused");
                false
            }
        }
    }

    fn try_extend_segment(&mut self, name: &str, size: u64) -> std::result::Result<(), String> {
        let endian = self.header.endian();
        let page = page_size(self.header.cputype);
        let target = self
            .get_segment(name)
            .ok_or_else(|| format!("no segment named {name}"))?;
        if size == 0 {
            return Ok(());
        }

        let insert_at = grow(target.fileoff, target.filesize, "segment file offset")?;
        let old_vm_end = grow(target.vmaddr, target.vmsize, "segment address")?;
        let delta = size
            .checked_next_multiple_of(page)
            .ok_or_else(|| format!("size {size:#x} cannot be page aligned"))?;
        let new_vm_end = grow(old_vm_end, delta, "segment end")?;
        if insert_at > self.image.len() as u64 {
            return Err(format!("segment ends past the image at {insert_at:#x}"));
        }
        let limit = IOLimits::default().max_file_size;
        let new_len = grow(self.image.len() as u64, delta, "image length")?;
        if new_len > limit {
            return Err(format!(
                "slice would grow to {new_len:#x} bytes, past the {limit:#x} byte limit"
            ));
        }

        let mut shift_linkedit_vm = false;
        for seg in self.segments() {
            if seg.name() == name || seg.vmsize == 0 {
                continue;
            }
            if seg.vmaddr >= old_vm_end && seg.vmaddr < new_vm_end {
                if seg.name() != LINKEDIT {
                    return Err(format!("{} would have to move in memory", seg.name()));
                }
                shift_linkedit_vm = true;
            }
        }
        if shift_linkedit_vm {
            let linkedit_vm = self.get_segment(LINKEDIT).map_or(0, |s| s.vmaddr);
            if self
                .segments()
                .iter()
                .any(|s| s.name() != LINKEDIT && s.vmsize != 0 && s.vmaddr > linkedit_vm)
            {
                return Err("__LINKEDIT must remain the last segment".to_string());
            }
        }

        for command in self.commands.iter_mut() {
            match command {
                LoadCommand::Segment(seg) => {
                    if seg.name() == name {
                        seg.filesize = grow(seg.filesize, size, "filesize")?;
                        seg.vmsize = grow(seg.vmsize, delta, "vmsize")?;
                        continue;
                    }
                    if seg.filesize > 0 && seg.fileoff >= insert_at {
                        seg.fileoff = grow(seg.fileoff, delta, "fileoff")?;
                    }
                    if shift_linkedit_vm && seg.name() == LINKEDIT {
                        seg.vmaddr = grow(seg.vmaddr, delta, "vmaddr")?;
                    }
                    for section in seg.sections_mut() {
                        let h = &mut section.header;
                        h.offset = shift_u32(h.offset, insert_at, delta)?;
                        if h.nreloc > 0 {
                            h.reloff = shift_u32(h.reloff, insert_at, delta)?;
                        }
                    }
                }
                LoadCommand::Other(raw) => shift_raw(raw, endian, insert_at, delta)?,
            }
        }

        let at = insert_at as usize;
        self.image
            .splice(at..at, std::iter::repeat(0u8).take(delta as usize));

        crate::log_debug!(
            insert_at,
            delta,
            linkedit_moved = shift_linkedit_vm,
            "Inserted segment padding"
        );
        Ok(())
    }
}
