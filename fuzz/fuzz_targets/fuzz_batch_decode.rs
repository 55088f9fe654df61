//! Fuzz target for newline-delimited payload decoding.
//!
//! Stored blobs come from disk and may be truncated or foreign; decoding
//! must never panic, and a decoded batch must survive re-encoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ts_core::TelemetryBatch;

fuzz_target!(|data: &[u8]| {
    if let Ok(batch) = TelemetryBatch::decode(data) {
        let again = TelemetryBatch::decode(&batch.encode());
        assert_eq!(again.as_ref(), Ok(&batch));
    }
});
