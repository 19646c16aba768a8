#![no_main]

//! Signed validator-registry TOML parsing must never panic on arbitrary
//! input, even though most inputs are not valid UTF-8 or valid TOML.

use istanbul_announce::membership::parse_registry_toml;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_registry_toml(s);
    }
});
