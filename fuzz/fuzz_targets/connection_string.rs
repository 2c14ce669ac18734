//! Fuzz target for connection descriptor parsing.
//!
//! Parsing must either fail cleanly or produce options whose canonical form
//! parses back to the same key.

#![no_main]

use fb_client::ConnectionOptions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(descriptor) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(options) = ConnectionOptions::parse(descriptor) else {
        return;
    };
    let _ = options.validate();
    let canonical = options.canonical();
    if let Ok(reparsed) = ConnectionOptions::parse(&canonical) {
        assert_eq!(reparsed.canonical(), canonical);
    }
});
