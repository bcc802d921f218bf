mod common;

use binforge::formats::pe::{PeBinary, PeMagic, Subsystem};
use binforge::{parse_binary, Error, GenericBinary, ParseConfig, Section};
use common::*;
use object::{Object, ObjectSection};

fn parse(data: &[u8]) -> PeBinary {
    PeBinary::parse(data, &ParseConfig::default()).unwrap()
}

#[test]
fn test_optional_header_snapshot() {
    let pe = parse(&pe_exe());
    let opt = pe.optional_header();
    assert_eq!(opt.magic(), PeMagic::Pe32Plus);
    assert_eq!(opt.major_linker_version(), 14);
    assert_eq!(opt.addressof_entrypoint(), 0x1000);
    assert_eq!(opt.baseof_data(), 0);
    assert_eq!(opt.imagebase(), PE_IMAGEBASE);
    assert_eq!(opt.section_alignment(), 0x1000);
    assert_eq!(opt.file_alignment(), 0x200);
    assert_eq!(opt.sizeof_image(), 0x3000);
    assert_eq!(opt.sizeof_headers(), 0x200);
    assert_eq!(opt.checksum(), 0);
    assert_eq!(opt.subsystem(), Subsystem::WindowsCui);
    assert_eq!(opt.sizeof_stack_reserve(), 0x10_0000);
    assert_eq!(opt.numberof_rva_and_size(), 16);

    assert_eq!(pe.entrypoint(), PE_IMAGEBASE + 0x1000);
    assert!(pe.is_pie());
    assert!(pe.has_nx());
}

#[test]
fn test_virtual_size_is_independent() {
    let mut pe = parse(&pe_exe());
    let text = pe.get_section_mut(".text").unwrap();
    assert_eq!(text.size(), 0x200);
    assert_eq!(text.virtual_size(), 0x10);

    text.set_virtual_size(0x180);
    assert_eq!(text.size(), 0x200);

    let rebuilt = parse(&pe.build().unwrap());
    let text = rebuilt.get_section(".text").unwrap();
    assert_eq!(text.virtual_size(), 0x180);
    assert_eq!(text.size(), 0x200);
}

#[test]
fn test_patch_by_va_and_write() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_temp(dir.path(), "input.exe", &pe_exe());

    let mut binary = parse_binary(&input).unwrap();
    binary
        .patch_address(PE_IMAGEBASE + 0x2004, b"XXXX")
        .unwrap();
    assert!(matches!(
        binary.patch_address(PE_IMAGEBASE + 0x9000, b"X"),
        Err(Error::AddressOutOfRange { .. })
    ));
    let output = dir.path().join("output.exe");
    binary.write(&output).unwrap();

    let written = std::fs::read(&output).unwrap();
    assert_eq!(&written[0x400..0x408], b"DATAXXXX");
    assert!(written.ends_with(b"OVLY"));

    let file = object::File::parse(&*written).unwrap();
    let data = file.section_by_name(".data").unwrap();
    assert_eq!(data.address(), PE_IMAGEBASE + 0x2000);
    assert_eq!(&data.data().unwrap()[..8], b"DATAXXXX");
}

#[test]
fn test_grown_section_pushes_later_raw_data() {
    let mut pe = parse(&pe_exe());
    let text = pe.get_section_mut(".text").unwrap();
    let mut code = text.content().to_vec();
    code.resize(0x300, 0xcc);
    text.set_content(code);

    let out = pe.build().unwrap();
    let rebuilt = parse(&out);
    let text = rebuilt.get_section(".text").unwrap();
    let data = rebuilt.get_section(".data").unwrap();
    assert_eq!(text.sizeof_raw_data(), 0x400);
    assert_eq!(text.virtual_size(), 0x300);
    assert_eq!(data.pointerto_raw_data(), 0x600);
    assert_eq!(&data.content()[..8], b"DATADATA");
    assert_eq!(rebuilt.overlay(), b"OVLY");
    assert_eq!(rebuilt.coff_header().number_of_sections, 2);

    let file = object::File::parse(&*out).unwrap();
    assert_eq!(file.sections().count(), 2);
}

#[test]
fn test_virtual_overlap_is_a_layout_error() {
    let mut pe = parse(&pe_exe());
    pe.get_section_mut(".text").unwrap().set_virtual_size(0x1001);
    assert!(matches!(pe.build(), Err(Error::Layout(_))));
}

#[test]
fn test_unmodified_roundtrip_is_identical() {
    let data = pe_exe();
    let pe = parse(&data);
    assert_eq!(pe.build().unwrap(), data);
    assert_eq!(pe.build().unwrap(), pe.build().unwrap());
}

#[test]
fn test_emptied_section_loses_its_raw_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut pe = parse(&pe_exe());
    pe.get_section_mut(".data").unwrap().set_content(Vec::new());
    let output = dir.path().join("emptied.exe");
    pe.write(&output).unwrap();

    let written = std::fs::read(&output).unwrap();
    let rebuilt = parse(&written);
    let data = rebuilt.get_section(".data").unwrap();
    assert_eq!(data.size(), 0);
    assert_eq!(data.sizeof_raw_data(), 0);
    assert_eq!(data.pointerto_raw_data(), 0);
    assert_eq!(data.virtual_size(), 0x20);
    assert!(!written.windows(8).any(|w| w == b"DATADATA"));
    assert!(written.ends_with(b"OVLY"));

    let file = object::File::parse(&*written).unwrap();
    assert_eq!(file.section_by_name(".data").unwrap().address(), PE_IMAGEBASE + 0x2000);
}
