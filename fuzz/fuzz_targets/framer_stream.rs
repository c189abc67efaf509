//! Fuzz target for the stream framer.
//!
//! Feeds arbitrary byte streams through `Framer::follow`, which must never
//! panic, and every frame it declares ready must carry a CRC that
//! re-verifies against the buffered body.

#![no_main]

use libfuzzer_sys::fuzz_target;
use thermit_proto::{crc16, Framer};

fuzz_target!(|data: &[u8]| {
    let mut framer = Framer::new();
    for &byte in data {
        if framer.follow(byte) {
            let body = framer.body();
            assert!(body.len() >= 8);
            let split = body.len() - 2;
            let received = u16::from_le_bytes([body[split], body[split + 1]]);
            assert_eq!(received, crc16(&body[..split]));
        }
    }
});
