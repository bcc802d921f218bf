//! Load command parsing and encoding
//!
//! Segment commands are decoded together with their sections. Every other
//! command is kept as raw bytes and edited in place, so commands this crate
//! does not model still round-trip exactly.

use crate::core::section::Section;
use crate::core::segment::Segment;
use crate::formats::bytes::{fixed_name, ByteSink, Endian, ReadExt, WriteExt};
use crate::formats::macho::header::MachHeader;
use crate::formats::macho::types::*;

const SEGMENT_32_SIZE: usize = 56;
const SEGMENT_64_SIZE: usize = 72;
const SECTION_32_SIZE: usize = 68;
const SECTION_64_SIZE: usize = 80;

/// `section` / `section_64` as stored in the segment command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachSectionHeader {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

/// A section with its bytes copied out of the file.
///
/// Zero-fill sections carry no content; their size lives in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachSection {
    pub header: MachSectionHeader,
    name: String,
    segment_name: String,
    content: Vec<u8>,
    relocations: Vec<MachRelocation>,
}

impl MachSection {
    pub fn new(header: MachSectionHeader, content: Vec<u8>) -> Self {
        Self {
            name: fixed_name(&header.sectname),
            segment_name: fixed_name(&header.segname),
            header,
            content,
            relocations: Vec::new(),
        }
    }

    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    pub fn section_type(&self) -> u32 {
        self.header.flags & SECTION_TYPE
    }

    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.section_type(),
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    pub fn alignment(&self) -> u64 {
        1u64 << self.header.align.min(63)
    }

    pub fn relocations(&self) -> &[MachRelocation] {
        &self.relocations
    }

    pub(crate) fn set_relocations(&mut self, relocations: Vec<MachRelocation>) {
        self.relocations = relocations;
    }
}

impl Section for MachSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn virtual_address(&self) -> u64 {
        self.header.addr
    }

    fn size(&self) -> u64 {
        if self.is_zerofill() {
            self.header.size
        } else {
            self.content.len() as u64
        }
    }

    fn set_size(&mut self, size: u64) {
        if self.is_zerofill() {
            self.header.size = size;
        } else {
            self.content.resize(size as usize, 0);
        }
    }

    fn file_offset(&self) -> u64 {
        self.header.offset as u64
    }

    fn content(&self) -> &[u8] {
        &self.content
    }

    fn content_mut(&mut self) -> &mut [u8] {
        &mut self.content
    }

    fn set_content(&mut self, content: Vec<u8>) {
        if self.is_zerofill() {
            self.header.size = content.len() as u64;
        } else {
            self.content = content;
        }
    }

    fn has_file_data(&self) -> bool {
        !self.is_zerofill() && self.header.offset != 0
    }
}

/// LC_SEGMENT / LC_SEGMENT_64 with its sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand {
    pub cmd: u32,
    /// As read; grows when the sections need more room.
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    name: String,
    sections: Vec<MachSection>,
}

impl SegmentCommand {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_64(&self) -> bool {
        self.cmd == LC_SEGMENT_64
    }

    pub fn sections(&self) -> &[MachSection] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut [MachSection] {
        &mut self.sections
    }

    pub fn get_section(&self, name: &str) -> Option<&MachSection> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn get_section_mut(&mut self, name: &str) -> Option<&mut MachSection> {
        self.sections.iter_mut().find(|s| s.name() == name)
    }

    pub fn file_end(&self) -> u64 {
        self.fileoff + self.filesize
    }

    pub fn contains_vaddr(&self, address: u64) -> bool {
        address >= self.vmaddr && address - self.vmaddr < self.vmsize
    }

    pub fn to_segment(&self) -> Segment {
        Segment {
            name: self.name.clone(),
            virtual_address: self.vmaddr,
            virtual_size: self.vmsize,
            file_offset: self.fileoff,
            file_size: self.filesize,
        }
    }

    fn encoded_size(&self) -> u32 {
        let (fixed, per_section) = if self.is_64() {
            (SEGMENT_64_SIZE, SECTION_64_SIZE)
        } else {
            (SEGMENT_32_SIZE, SECTION_32_SIZE)
        };
        ((fixed + self.sections.len() * per_section) as u32).max(self.cmdsize)
    }
}

/// A command kept byte-for-byte, header words included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub cmd: u32,
    pub data: Vec<u8>,
}

impl RawCommand {
    pub fn u32_at(&self, offset: usize, endian: Endian) -> Option<u32> {
        self.data.read_u32_at(offset, endian)
    }

    pub fn u64_at(&self, offset: usize, endian: Endian) -> Option<u64> {
        self.data.read_u64_at(offset, endian)
    }

    pub fn set_u32_at(&mut self, offset: usize, value: u32, endian: Endian) -> Option<()> {
        self.data.write_u32_at(offset, value, endian)
    }

    pub fn set_u64_at(&mut self, offset: usize, value: u64, endian: Endian) -> Option<()> {
        self.data.write_u64_at(offset, value, endian)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCommand {
    Segment(SegmentCommand),
    Other(RawCommand),
}

impl LoadCommand {
    pub fn cmd(&self) -> u32 {
        match self {
            LoadCommand::Segment(seg) => seg.cmd,
            LoadCommand::Other(raw) => raw.cmd,
        }
    }

    pub fn cmdsize(&self) -> u32 {
        match self {
            LoadCommand::Segment(seg) => seg.encoded_size(),
            LoadCommand::Other(raw) => raw.data.len() as u32,
        }
    }

    pub fn as_segment(&self) -> Option<&SegmentCommand> {
        match self {
            LoadCommand::Segment(seg) => Some(seg),
            LoadCommand::Other(_) => None,
        }
    }

    pub fn as_segment_mut(&mut self) -> Option<&mut SegmentCommand> {
        match self {
            LoadCommand::Segment(seg) => Some(seg),
            LoadCommand::Other(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawCommand> {
        match self {
            LoadCommand::Other(raw) => Some(raw),
            LoadCommand::Segment(_) => None,
        }
    }
}

/// Walk `ncmds` commands after the header.
pub fn parse_load_commands(
    data: &[u8],
    header: &MachHeader,
    max_commands: u32,
) -> Result<Vec<LoadCommand>> {
    if header.ncmds > max_commands {
        return Err(MachOError::LimitExceeded("load command count"));
    }
    let endian = header.endian();
    let start = header.size();
    let end = start + header.sizeofcmds as usize;
    if end > data.len() {
        return Err(MachOError::Truncated {
            offset: start,
            needed: header.sizeofcmds as usize,
        });
    }

    let mut commands = Vec::with_capacity(header.ncmds as usize);
    let mut offset = start;
    for index in 0..header.ncmds as usize {
        let malformed = |reason: &str| MachOError::MalformedLoadCommand {
            index,
            reason: reason.to_string(),
        };
        let cmd = data
            .read_u32_at(offset, endian)
            .ok_or_else(|| malformed("truncated command header"))?;
        let cmdsize = data
            .read_u32_at(offset + 4, endian)
            .ok_or_else(|| malformed("truncated command header"))? as usize;
        if cmdsize < 8 || offset + cmdsize > end {
            return Err(malformed("cmdsize runs outside the command area"));
        }

        let bytes = &data[offset..offset + cmdsize];
        let command = match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                LoadCommand::Segment(parse_segment(data, bytes, cmd, endian, index)?)
            }
            _ => LoadCommand::Other(RawCommand {
                cmd,
                data: bytes.to_vec(),
            }),
        };
        commands.push(command);
        offset += cmdsize;
    }

    Ok(commands)
}

fn parse_segment(
    data: &[u8],
    bytes: &[u8],
    cmd: u32,
    endian: Endian,
    index: usize,
) -> Result<SegmentCommand> {
    let is_64 = cmd == LC_SEGMENT_64;
    let malformed = |reason: &str| MachOError::MalformedLoadCommand {
        index,
        reason: reason.to_string(),
    };
    let fixed = if is_64 { SEGMENT_64_SIZE } else { SEGMENT_32_SIZE };
    if bytes.len() < fixed {
        return Err(malformed("segment command too small"));
    }

    let u32_at = |offset: usize| {
        bytes
            .read_u32_at(offset, endian)
            .ok_or_else(|| malformed("truncated segment command"))
    };
    let addr_at = |offset: usize| -> Result<u64> {
        if is_64 {
            bytes
                .read_u64_at(offset, endian)
                .ok_or_else(|| malformed("truncated segment command"))
        } else {
            u32_at(offset).map(u64::from)
        }
    };

    let mut segname = [0u8; 16];
    segname.copy_from_slice(&bytes[8..24]);
    let word = if is_64 { 8 } else { 4 };
    let vmaddr = addr_at(24)?;
    let vmsize = addr_at(24 + word)?;
    let fileoff = addr_at(24 + 2 * word)?;
    let filesize = addr_at(24 + 3 * word)?;
    let tail = 24 + 4 * word;
    let maxprot = u32_at(tail)?;
    let initprot = u32_at(tail + 4)?;
    let nsects = u32_at(tail + 8)? as usize;
    let flags = u32_at(tail + 12)?;

    let name = fixed_name(&segname);
    if fileoff.saturating_add(filesize) > data.len() as u64 {
        return Err(MachOError::SegmentOutOfBounds {
            name,
            offset: fileoff,
            size: filesize,
        });
    }

    let per_section = if is_64 { SECTION_64_SIZE } else { SECTION_32_SIZE };
    if fixed + nsects.saturating_mul(per_section) > bytes.len() {
        return Err(malformed("sections run past cmdsize"));
    }

    let mut sections = Vec::with_capacity(nsects);
    for i in 0..nsects {
        let at = fixed + i * per_section;
        let header = parse_section_header(&bytes[at..at + per_section], endian, is_64)
            .ok_or_else(|| malformed("truncated section header"))?;
        let mut section = MachSection::new(header, Vec::new());
        if section.has_file_data() && header.size > 0 {
            let content = data
                .read_slice_at(header.offset as usize, header.size as usize)
                .ok_or_else(|| MachOError::SectionOutOfBounds {
                    name: section.name().to_string(),
                    offset: header.offset as u64,
                    size: header.size,
                })?;
            section.content = content.to_vec();
        }
        sections.push(section);
    }

    Ok(SegmentCommand {
        cmd,
        cmdsize: bytes.len() as u32,
        segname,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot,
        initprot,
        flags,
        name,
        sections,
    })
}

fn parse_section_header(raw: &[u8], endian: Endian, is_64: bool) -> Option<MachSectionHeader> {
    let mut sectname = [0u8; 16];
    let mut segname = [0u8; 16];
    sectname.copy_from_slice(raw.get(0..16)?);
    segname.copy_from_slice(raw.get(16..32)?);
    let (addr, size, rest) = if is_64 {
        (raw.read_u64_at(32, endian)?, raw.read_u64_at(40, endian)?, 48)
    } else {
        (
            raw.read_u32_at(32, endian)? as u64,
            raw.read_u32_at(36, endian)? as u64,
            40,
        )
    };
    Some(MachSectionHeader {
        sectname,
        segname,
        addr,
        size,
        offset: raw.read_u32_at(rest, endian)?,
        align: raw.read_u32_at(rest + 4, endian)?,
        reloff: raw.read_u32_at(rest + 8, endian)?,
        nreloc: raw.read_u32_at(rest + 12, endian)?,
        flags: raw.read_u32_at(rest + 16, endian)?,
        reserved1: raw.read_u32_at(rest + 20, endian)?,
        reserved2: raw.read_u32_at(rest + 24, endian)?,
        reserved3: if is_64 {
            raw.read_u32_at(rest + 28, endian)?
        } else {
            0
        },
    })
}

/// Append one command. Segment sizes follow their sections.
pub fn encode_load_command(sink: &mut ByteSink, command: &LoadCommand) {
    match command {
        LoadCommand::Other(raw) => {
            sink.bytes(&raw.data);
        }
        LoadCommand::Segment(seg) => {
            let start = sink.len();
            let is_64 = seg.is_64();
            let cmdsize = seg.encoded_size();
            sink.u32(seg.cmd)
                .u32(cmdsize)
                .bytes(&seg.segname)
                .addr(seg.vmaddr, is_64)
                .addr(seg.vmsize, is_64)
                .addr(seg.fileoff, is_64)
                .addr(seg.filesize, is_64)
                .u32(seg.maxprot)
                .u32(seg.initprot)
                .u32(seg.sections.len() as u32)
                .u32(seg.flags);
            for section in &seg.sections {
                let h = &section.header;
                sink.bytes(&h.sectname)
                    .bytes(&h.segname)
                    .addr(h.addr, is_64)
                    .addr(section.size(), is_64)
                    .u32(h.offset)
                    .u32(h.align)
                    .u32(h.reloff)
                    .u32(h.nreloc)
                    .u32(h.flags)
                    .u32(h.reserved1)
                    .u32(h.reserved2);
                if is_64 {
                    sink.u32(h.reserved3);
                }
            }
            let written = sink.len() - start;
            sink.zeros(cmdsize as usize - written);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::macho::header::parse_header;

    /// 64-bit header followed by one __TEXT segment with a __text section
    /// and an LC_UUID.
    fn image() -> Vec<u8> {
        let mut sink = ByteSink::new(Endian::Little);
        sink.u32(MH_MAGIC_64)
            .u32(cpu_type::X86_64)
            .u32(3)
            .u32(MH_EXECUTE)
            .u32(2)
            .u32(72 + 80 + 24)
            .u32(0)
            .u32(0);
        let mut segname = [0u8; 16];
        segname[..6].copy_from_slice(b"__TEXT");
        sink.u32(LC_SEGMENT_64)
            .u32(72 + 80)
            .bytes(&segname)
            .u64(0x1_0000_0000)
            .u64(0x1000)
            .u64(0)
            .u64(0x200)
            .u32(5)
            .u32(5)
            .u32(1)
            .u32(0);
        let mut sectname = [0u8; 16];
        sectname[..6].copy_from_slice(b"__text");
        sink.bytes(&sectname)
            .bytes(&segname)
            .u64(0x1_0000_0100)
            .u64(0x10)
            .u32(0x100)
            .u32(4)
            .u32(0)
            .u32(0)
            .u32(0x8000_0400)
            .u32(0)
            .u32(0)
            .u32(0);
        sink.u32(LC_UUID).u32(24).bytes(&[0xab; 16]);
        let mut data = sink.into_inner();
        data.resize(0x200, 0);
        data[0x100..0x110].copy_from_slice(&[0xc3; 16]);
        data
    }

    #[test]
    fn test_parse_segment_and_raw() {
        let data = image();
        let header = parse_header(&data).unwrap();
        let commands = parse_load_commands(&data, &header, 16).unwrap();
        assert_eq!(commands.len(), 2);

        let seg = commands[0].as_segment().unwrap();
        assert_eq!(seg.name(), "__TEXT");
        assert_eq!(seg.filesize, 0x200);
        let text = seg.get_section("__text").unwrap();
        assert_eq!(text.segment_name(), "__TEXT");
        assert_eq!(text.content(), &[0xc3; 16]);
        assert_eq!(text.alignment(), 16);

        assert_eq!(commands[1].cmd(), LC_UUID);
        assert_eq!(commands[1].cmdsize(), 24);
    }

    #[test]
    fn test_encode_matches_input() {
        let data = image();
        let header = parse_header(&data).unwrap();
        let commands = parse_load_commands(&data, &header, 16).unwrap();
        let mut sink = ByteSink::new(Endian::Little);
        for command in &commands {
            encode_load_command(&mut sink, command);
        }
        assert_eq!(sink.into_inner(), &data[32..32 + header.sizeofcmds as usize]);
    }

    #[test]
    fn test_command_limits() {
        let data = image();
        let header = parse_header(&data).unwrap();
        assert!(matches!(
            parse_load_commands(&data, &header, 1),
            Err(MachOError::LimitExceeded(_))
        ));

        let mut bad = data.clone();
        bad[32 + 4..32 + 8].copy_from_slice(&4u32.to_le_bytes());
        let header = parse_header(&bad).unwrap();
        assert!(matches!(
            parse_load_commands(&bad, &header, 16),
            Err(MachOError::MalformedLoadCommand { index: 0, .. })
        ));
    }
}
