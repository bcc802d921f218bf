#![no_main]
use binforge::{parse_bytes, GenericBinary, ParseConfig, Parsed};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match parse_bytes(data, &ParseConfig::default()) {
        Ok(Parsed::Binary(binary)) => {
            let _ = binary.build();
        }
        Ok(Parsed::Fat(fat)) => {
            let _ = fat.build();
        }
        _ => {}
    }
});
