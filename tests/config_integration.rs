mod common;

use binforge::formats::elf::ElfError;
use binforge::io::error::IoError;
use binforge::{
    detect, logging, parse_bytes, parse_with, EngineConfig, Error, Format, GenericBinary, Parsed,
};
use common::*;

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.parse.max_symbols = 10;
    config.write.check_entrypoint = false;

    let path = dir.path().join("binforge.json");
    std::fs::write(&path, config.to_json().unwrap()).unwrap();
    let loaded = EngineConfig::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_symbol_limit_is_enforced() {
    let mut config = EngineConfig::default();
    config.parse.max_symbols = 0;
    assert!(matches!(
        parse_bytes(&elf_exe(), &config.parse),
        Err(Error::Elf(ElfError::LimitExceeded(_)))
    ));

    // Skipping the table skips the limit too.
    config.parse.parse_symbols = false;
    let binary = parse_bytes(&elf_exe(), &config.parse)
        .unwrap()
        .into_binary()
        .unwrap();
    assert!(binary.as_elf().unwrap().get_symbol("main").is_none());
}

#[test]
fn test_file_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(dir.path(), "big", &pe_exe());
    let mut config = EngineConfig::default();
    config.io.max_file_size = 0x100;
    assert!(matches!(
        parse_with(&path, &config),
        Err(Error::Io(IoError::FileTooLarge { limit: 0x100, .. }))
    ));
}

#[test]
fn test_detection_and_unrecognized_input() {
    assert_eq!(detect(&elf_exe()), Format::ELF);
    assert_eq!(detect(&pe_exe()), Format::PE);
    assert_eq!(detect(&macho_exe(CPU_X86_64)), Format::MachO);
    assert_eq!(detect(&macho_fat()), Format::MachO);
    assert_eq!(detect(b"#!/bin/sh\n"), Format::Unknown);

    let dir = tempfile::tempdir().unwrap();
    let path = write_temp(dir.path(), "script", b"#!/bin/sh\nexit 0\n");
    let parsed = parse_with(&path, &EngineConfig::default()).unwrap();
    assert!(matches!(parsed, Parsed::Unrecognized));
    assert_eq!(parsed.format(), Format::Unknown);
}

#[test]
fn test_logging_switch_does_not_change_results() {
    logging::init_tracing();
    logging::disable();
    assert!(!logging::is_enabled());
    let quiet = parse_bytes(&pe_exe(), &Default::default())
        .unwrap()
        .into_binary()
        .unwrap();

    logging::enable();
    assert!(logging::is_enabled());
    let loud = parse_bytes(&pe_exe(), &Default::default())
        .unwrap()
        .into_binary()
        .unwrap();
    assert_eq!(quiet.header(), loud.header());
}
