//! Fuzz target for blob file name parsing.
//!
//! Any name that parses must render to a name that parses again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ts_storage::BlobName;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(name) = BlobName::parse(s) {
        assert!(BlobName::parse(&name.file_name()).is_ok());
    }
});
