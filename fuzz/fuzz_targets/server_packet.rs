//! Fuzz target for decoding server packets.
//!
//! Every answer the client reads goes through `ServerPacket::decode`, so
//! arbitrary bytes must never panic or allocate unbounded buffers.
//!
//! ```bash
//! cargo +nightly fuzz run server_packet
//! ```

#![no_main]

use bytes::Bytes;
use fb_protocol::{ServerPacket, StatusVector};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = Bytes::copy_from_slice(data);
    if let Ok(ServerPacket::Response(response)) = ServerPacket::decode(&mut buf) {
        // rendering walks every status argument
        let _ = response.status.message();
        let _ = response.status.warnings();
        let _ = StatusVector::from_args(response.status.args().to_vec()).error_code();
    }
});
