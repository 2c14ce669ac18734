//! Fuzz target for parameter buffer parsing and rebuilding.

#![no_main]

use fb_protocol::ParameterBuffer;
use fb_protocol::dpb;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok((version, items)) = dpb::parse_items(data) else {
        return;
    };
    let mut rebuilt = ParameterBuffer::with_version(version);
    for (tag, value) in &items {
        if rebuilt.append_bytes(*tag, value).is_err() {
            return;
        }
    }
    assert_eq!(dpb::parse_items(rebuilt.as_bytes()).ok(), Some((version, items)));
});
