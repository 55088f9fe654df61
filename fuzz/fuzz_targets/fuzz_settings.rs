//! Fuzz target for telespool.toml parsing and validation.

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use ts_config::{validate_settings, Settings};

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    // Should never panic, only return an error
    if let Ok(settings) = Settings::from_toml_str(content, Path::new("fuzz.toml")) {
        let _ = validate_settings(&settings);
    }
});
