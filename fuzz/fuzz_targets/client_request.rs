//! Fuzz target for decoding client requests, as the mock server does.

#![no_main]

use bytes::Bytes;
use fb_protocol::Request;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = Bytes::copy_from_slice(data);
    if let Ok(Request::Connect(connect)) = Request::decode(&mut buf) {
        let _ = connect.preferred();
    }
});
