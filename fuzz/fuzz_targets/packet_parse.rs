//! Fuzz target for the frame body parser.
//!
//! Arbitrary slices must either parse into a packet that re-encodes to the
//! identical body, or fail with an error. No panics, no over-reads.

#![no_main]

use libfuzzer_sys::fuzz_target;
use thermit_proto::{Packet, MSG_SIZE_MAX};

fuzz_target!(|data: &[u8]| {
    if let Ok(pkt) = Packet::parse(data) {
        let mut buf = [0u8; MSG_SIZE_MAX];
        let len = pkt.encode(&mut buf).expect("parsed packet re-encodes");
        assert_eq!(&buf[..len], data);
    }
});
