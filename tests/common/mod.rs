//! Shared builders for integration tests.
//!
//! Every image is assembled by hand so the tests need no sample files.
//! Layout details each builder guarantees are listed on the function.

#![allow(dead_code)]

use binforge::formats::bytes::{ByteSink, Endian};
use std::path::{Path, PathBuf};

pub fn write_temp(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write test input");
    path
}

/// Byte pattern used for `.text` so every position is distinguishable.
pub fn text_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub const ELF_TEXT_ADDR: u64 = 0x1000;
pub const ELF_TEXT_SIZE: usize = 0x200;
pub const ELF_LEN: usize = 0x1398;

#[allow(clippy::too_many_arguments)]
fn elf_shdr(
    sink: &mut ByteSink,
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    range: (u64, u64),
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
) {
    sink.u32(name)
        .u32(sh_type)
        .u64(flags)
        .u64(addr)
        .u64(range.0)
        .u64(range.1)
        .u32(link)
        .u32(info)
        .u64(align)
        .u64(entsize);
}

/// ELF64 little-endian executable.
///
/// - PT_LOAD maps file [0, 0x1200) at address 0, read+execute.
/// - PT_GNU_STACK without PF_X.
/// - `.text` at address/offset 0x1000, 0x200 bytes of [`text_pattern`].
/// - `.symtab` with one global `main` at 0x1000, then `.strtab`,
///   `.shstrtab` and the section header table at 0x1258.
pub fn elf_exe() -> Vec<u8> {
    let shstrtab = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";
    let strtab = b"\0main\0";

    let mut sink = ByteSink::new(Endian::Little);
    sink.bytes(b"\x7fELF")
        .u8(2)
        .u8(1)
        .u8(1)
        .zeros(9)
        .u16(2) // ET_EXEC
        .u16(62) // EM_X86_64
        .u32(1)
        .u64(ELF_TEXT_ADDR)
        .u64(64)
        .u64(0x1258)
        .u32(0)
        .u16(64)
        .u16(56)
        .u16(2)
        .u16(64)
        .u16(5)
        .u16(4);
    // PT_LOAD
    sink.u32(1)
        .u32(0x4 | 0x1)
        .u64(0)
        .u64(0)
        .u64(0)
        .u64(0x1200)
        .u64(0x1200)
        .u64(0x1000);
    // PT_GNU_STACK
    sink.u32(0x6474_e551)
        .u32(0x4 | 0x2)
        .zeros(40)
        .u64(16);

    let mut data = sink.into_inner();
    data.resize(0x1000, 0);
    data.extend_from_slice(&text_pattern(ELF_TEXT_SIZE));

    let mut symtab = ByteSink::new(Endian::Little);
    symtab.zeros(24);
    symtab
        .u32(1)
        .u8(0x12) // STB_GLOBAL | STT_FUNC
        .u8(0)
        .u16(1)
        .u64(ELF_TEXT_ADDR)
        .u64(0x20);
    data.extend_from_slice(&symtab.into_inner());
    data.extend_from_slice(strtab);
    data.extend_from_slice(shstrtab);
    data.resize(0x1258, 0);

    let mut shdrs = ByteSink::new(Endian::Little);
    shdrs.zeros(64);
    elf_shdr(&mut shdrs, 1, 1, 0x6, ELF_TEXT_ADDR, (0x1000, 0x200), 0, 0, 16, 0);
    elf_shdr(&mut shdrs, 7, 2, 0, 0, (0x1200, 48), 3, 1, 8, 24);
    elf_shdr(&mut shdrs, 15, 3, 0, 0, (0x1230, 6), 0, 0, 1, 0);
    elf_shdr(
        &mut shdrs,
        23,
        3,
        0,
        0,
        (0x1236, shstrtab.len() as u64),
        0,
        0,
        1,
        0,
    );
    data.extend_from_slice(&shdrs.into_inner());
    assert_eq!(data.len(), ELF_LEN);
    data
}

pub const PE_IMAGEBASE: u64 = 0x1_4000_0000;

fn pe_section(sink: &mut ByteSink, name: &[u8], layout: [u32; 4], flags: u32) {
    let mut raw = [0u8; 8];
    raw[..name.len()].copy_from_slice(name);
    sink.bytes(&raw)
        .u32(layout[0])
        .u32(layout[1])
        .u32(layout[2])
        .u32(layout[3])
        .zeros(12)
        .u32(flags);
}

/// PE32+ executable at [`PE_IMAGEBASE`].
///
/// - `.text`: RVA 0x1000, virtual size 0x10, raw 0x200 bytes at 0x200.
/// - `.data`: RVA 0x2000, virtual size 0x20, raw 0x200 bytes at 0x400,
///   starting with `DATADATA`.
/// - Entry at RVA 0x1000, DYNAMIC_BASE and NX_COMPAT, checksum 0.
/// - Four bytes of overlay (`OVLY`) at 0x600.
pub fn pe_exe() -> Vec<u8> {
    let mut sink = ByteSink::new(Endian::Little);
    sink.bytes(b"MZ").zeros(0x3a).u32(0x80).zeros(0x40);
    sink.bytes(b"PE\0\0")
        .u16(0x8664)
        .u16(2)
        .u32(0)
        .u32(0)
        .u32(0)
        .u16(0xf0)
        .u16(0x0022);
    // Optional header, PE32+
    sink.u16(0x20b)
        .u8(14)
        .u8(0)
        .u32(0x200)
        .u32(0x200)
        .u32(0)
        .u32(0x1000)
        .u32(0x1000)
        .u64(PE_IMAGEBASE)
        .u32(0x1000)
        .u32(0x200)
        .u16(6)
        .u16(0)
        .u16(0)
        .u16(0)
        .u16(6)
        .u16(0)
        .u32(0)
        .u32(0x3000)
        .u32(0x200)
        .u32(0)
        .u16(3)
        .u16(0x0040 | 0x0100)
        .u64(0x10_0000)
        .u64(0x1000)
        .u64(0x10_0000)
        .u64(0x1000)
        .u32(0)
        .u32(16)
        .zeros(16 * 8);
    pe_section(&mut sink, b".text", [0x10, 0x1000, 0x200, 0x200], 0x6000_0020);
    pe_section(&mut sink, b".data", [0x20, 0x2000, 0x200, 0x400], 0xc000_0040);

    let mut data = sink.into_inner();
    assert_eq!(data.len(), 0x1d8);
    data.resize(0x200, 0);
    data.extend_from_slice(&text_pattern(0x10));
    data.resize(0x400, 0);
    data.extend_from_slice(b"DATADATA");
    data.resize(0x600, 0);
    data.extend_from_slice(b"OVLY");
    data
}

pub const MACHO_TEXT_VMADDR: u64 = 0x1_0000_0000;

fn name16(name: &str) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    raw
}

fn macho_segment(
    sink: &mut ByteSink,
    name: &str,
    vm: (u64, u64),
    file: (u64, u64),
    prot: u32,
    section: Option<(&str, u64, u64, u32)>,
) {
    let nsects = section.is_some() as u32;
    sink.u32(0x19)
        .u32(72 + 80 * nsects)
        .bytes(&name16(name))
        .u64(vm.0)
        .u64(vm.1)
        .u64(file.0)
        .u64(file.1)
        .u32(prot)
        .u32(prot)
        .u32(nsects)
        .u32(0);
    if let Some((sectname, addr, size, offset)) = section {
        sink.bytes(&name16(sectname))
            .bytes(&name16(name))
            .u64(addr)
            .u64(size)
            .u32(offset)
            .u32(4)
            .zeros(24);
    }
}

/// Thin x86_64 Mach-O executable, 0x2100 bytes.
///
/// - `__TEXT` file [0, 0x1000) with `__text` at 0xf00 (16 bytes).
/// - `__DATA` file [0x1000, 0x2000) with `__data` (`DATADATA`).
/// - `__LINKEDIT` file [0x2000, 0x2100): one `_main` symbol, then a code
///   signature blob from 0x2020 to the end of the file.
/// - LC_MAIN entry at `__TEXT` + 0xf00.
pub fn macho_exe(cputype: u32) -> Vec<u8> {
    let mut sink = ByteSink::new(Endian::Little);
    sink.u32(0xfeed_facf)
        .u32(cputype)
        .u32(3)
        .u32(2)
        .u32(7)
        .u32(0x200)
        .u32(0x0020_0085)
        .u32(0);
    macho_segment(&mut sink, "__PAGEZERO", (0, MACHO_TEXT_VMADDR), (0, 0), 0, None);
    macho_segment(
        &mut sink,
        "__TEXT",
        (MACHO_TEXT_VMADDR, 0x1000),
        (0, 0x1000),
        5,
        Some(("__text", MACHO_TEXT_VMADDR + 0xf00, 0x10, 0xf00)),
    );
    macho_segment(
        &mut sink,
        "__DATA",
        (MACHO_TEXT_VMADDR + 0x1000, 0x1000),
        (0x1000, 0x1000),
        3,
        Some(("__data", MACHO_TEXT_VMADDR + 0x1000, 8, 0x1000)),
    );
    macho_segment(
        &mut sink,
        "__LINKEDIT",
        (MACHO_TEXT_VMADDR + 0x2000, 0x1000),
        (0x2000, 0x100),
        1,
        None,
    );
    sink.u32(0x8000_0028).u32(24).u64(0xf00).u64(0);
    sink.u32(0x2).u32(24).u32(0x2000).u32(1).u32(0x2010).u32(8);
    sink.u32(0x1d).u32(16).u32(0x2020).u32(0xe0);

    let mut data = sink.into_inner();
    assert_eq!(data.len(), 32 + 0x200);
    data.resize(0x2100, 0);
    data[0xf00..0xf10].copy_from_slice(&text_pattern(16));
    data[0x1000..0x1008].copy_from_slice(b"DATADATA");

    let mut nlist = ByteSink::new(Endian::Little);
    nlist.u32(1).u8(0x0f).u8(1).u16(0).u64(MACHO_TEXT_VMADDR + 0xf00);
    data[0x2000..0x2010].copy_from_slice(&nlist.into_inner());
    data[0x2010..0x2018].copy_from_slice(b"\0_main\0\0");
    data[0x2020..0x2024].copy_from_slice(&0xfade_0cc0u32.to_be_bytes());
    data[0x2024..0x2100].fill(0xaa);
    data
}

pub const CPU_X86_64: u32 = 0x0100_0007;
pub const CPU_ARM64: u32 = 0x0100_000c;

/// Universal file with an x86_64 slice at 0x1000 and an arm64 slice at
/// 0x4000.
pub fn macho_fat() -> Vec<u8> {
    let x86 = macho_exe(CPU_X86_64);
    let arm = macho_exe(CPU_ARM64);
    let mut sink = ByteSink::new(Endian::Big);
    sink.u32(0xcafe_babe).u32(2);
    sink.u32(CPU_X86_64)
        .u32(3)
        .u32(0x1000)
        .u32(x86.len() as u32)
        .u32(12);
    sink.u32(CPU_ARM64)
        .u32(0)
        .u32(0x4000)
        .u32(arm.len() as u32)
        .u32(14);
    let mut data = sink.into_inner();
    data.resize(0x1000, 0);
    data.extend_from_slice(&x86);
    data.resize(0x4000, 0);
    data.extend_from_slice(&arm);
    data
}

pub const ELF32_TEXT_ADDR: u64 = 0x10100;
pub const ELF32_LEN: usize = 0x250;

/// ELF32 big-endian PowerPC executable.
///
/// - PT_LOAD maps file [0, 0x140) at 0x10000, then PT_GNU_STACK.
/// - `.text` at offset 0x100 (address 0x10100), 0x40 bytes of [`text_pattern`].
/// - `.symtab` with one global `main`, `.strtab`, `.shstrtab`, and the
///   section header table at 0x188.
pub fn elf32_be() -> Vec<u8> {
    let shstrtab = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";
    let strtab = b"\0main\0";

    let mut sink = ByteSink::new(Endian::Big);
    sink.bytes(b"\x7fELF")
        .u8(1)
        .u8(2)
        .u8(1)
        .zeros(9)
        .u16(2) // ET_EXEC
        .u16(20) // EM_PPC
        .u32(1)
        .u32(ELF32_TEXT_ADDR as u32)
        .u32(52)
        .u32(0x188)
        .u32(0)
        .u16(52)
        .u16(32)
        .u16(2)
        .u16(40)
        .u16(5)
        .u16(4);
    // PT_LOAD
    sink.u32(1)
        .u32(0)
        .u32(0x10000)
        .u32(0x10000)
        .u32(0x140)
        .u32(0x140)
        .u32(0x4 | 0x1)
        .u32(0x10000);
    // PT_GNU_STACK
    sink.u32(0x6474_e551).zeros(20).u32(0x4 | 0x2).u32(16);

    let mut data = sink.into_inner();
    data.resize(0x100, 0);
    data.extend_from_slice(&text_pattern(0x40));

    let mut symtab = ByteSink::new(Endian::Big);
    symtab.zeros(16);
    symtab
        .u32(1)
        .u32(ELF32_TEXT_ADDR as u32)
        .u32(0x10)
        .u8(0x12) // STB_GLOBAL | STT_FUNC
        .u8(0)
        .u16(1);
    data.extend_from_slice(&symtab.into_inner());
    data.extend_from_slice(strtab);
    data.extend_from_slice(shstrtab);
    assert_eq!(data.len(), 0x188);

    let mut shdrs = ByteSink::new(Endian::Big);
    shdrs.zeros(40);
    let mut shdr = |name: u32, ty: u32, flags: u32, addr: u32, range: (u32, u32), link: u32, info: u32, align: u32, entsize: u32| {
        shdrs
            .u32(name)
            .u32(ty)
            .u32(flags)
            .u32(addr)
            .u32(range.0)
            .u32(range.1)
            .u32(link)
            .u32(info)
            .u32(align)
            .u32(entsize);
    };
    shdr(1, 1, 0x6, ELF32_TEXT_ADDR as u32, (0x100, 0x40), 0, 0, 4, 0);
    shdr(7, 2, 0, 0, (0x140, 32), 3, 1, 4, 16);
    shdr(15, 3, 0, 0, (0x160, 6), 0, 0, 1, 0);
    shdr(23, 3, 0, 0, (0x166, shstrtab.len() as u32), 0, 0, 1, 0);
    data.extend_from_slice(&shdrs.into_inner());
    assert_eq!(data.len(), ELF32_LEN);
    data
}

pub const MACHO32_TEXT_VMADDR: u64 = 0x1000;
pub const CPU_POWERPC: u32 = 18;

fn macho32_segment(
    sink: &mut ByteSink,
    name: &str,
    vm: (u32, u32),
    file: (u32, u32),
    section: Option<(&str, u32, u32, u32)>,
) {
    let nsects = section.is_some() as u32;
    sink.u32(0x1)
        .u32(56 + 68 * nsects)
        .bytes(&name16(name))
        .u32(vm.0)
        .u32(vm.1)
        .u32(file.0)
        .u32(file.1)
        .u32(7)
        .u32(5)
        .u32(nsects)
        .u32(0);
    if let Some((sectname, addr, size, offset)) = section {
        sink.bytes(&name16(sectname))
            .bytes(&name16(name))
            .u32(addr)
            .u32(size)
            .u32(offset)
            .u32(2)
            .zeros(20);
    }
}

/// Thin 32-bit big-endian (PowerPC) Mach-O executable, 0x1020 bytes.
///
/// - `__TEXT` file [0, 0x1000) at 0x1000 with `__text` at 0xf00 (16 bytes).
/// - `__LINKEDIT` file [0x1000, 0x1020) with one `_main` symbol.
/// - LC_MAIN entry at `__TEXT` + 0xf00.
pub fn macho32_be() -> Vec<u8> {
    let mut sink = ByteSink::new(Endian::Big);
    sink.u32(0xfeed_face)
        .u32(CPU_POWERPC)
        .u32(0)
        .u32(2)
        .u32(5)
        .u32(56 + 124 + 56 + 24 + 24)
        .u32(0x85);
    macho32_segment(&mut sink, "__PAGEZERO", (0, 0x1000), (0, 0), None);
    macho32_segment(
        &mut sink,
        "__TEXT",
        (0x1000, 0x1000),
        (0, 0x1000),
        Some(("__text", 0x1f00, 0x10, 0xf00)),
    );
    macho32_segment(&mut sink, "__LINKEDIT", (0x2000, 0x1000), (0x1000, 0x20), None);
    sink.u32(0x8000_0028).u32(24).u64(0xf00).u64(0);
    sink.u32(0x2).u32(24).u32(0x1000).u32(1).u32(0x1010).u32(8);

    let mut data = sink.into_inner();
    assert_eq!(data.len(), 28 + 284);
    data.resize(0x1020, 0);
    data[0xf00..0xf10].copy_from_slice(&text_pattern(16));

    let mut nlist = ByteSink::new(Endian::Big);
    nlist.u32(1).u8(0x0f).u8(1).u16(0).u32(0x1f00);
    data[0x1000..0x100c].copy_from_slice(&nlist.into_inner());
    data[0x1010..0x1018].copy_from_slice(b"\0_main\0\0");
    data
}
