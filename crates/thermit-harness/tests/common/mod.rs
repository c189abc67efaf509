//! Shared helpers for the harness integration tests.

#![allow(dead_code)]

use thermit_proto::{FCode, Framer, MSG_SIZE_MAX, Packet};

/// Owned copy of a parsed frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPacket {
    pub fcode: FCode,
    pub rec_file_id: u8,
    pub rec_feedback: u8,
    pub snd_file_id: u8,
    pub snd_chunk_no: u8,
    pub payload: Vec<u8>,
}

/// Run a byte snapshot through a fresh framer and parse every frame in it.
pub fn decode_frames(stream: &[u8]) -> Vec<OwnedPacket> {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    for &byte in stream {
        if framer.follow(byte) {
            let pkt = Packet::parse(framer.body()).expect("framer emits parseable bodies");
            frames.push(OwnedPacket {
                fcode: pkt.fcode,
                rec_file_id: pkt.rec_file_id,
                rec_feedback: pkt.rec_feedback,
                snd_file_id: pkt.snd_file_id,
                snd_chunk_no: pkt.snd_chunk_no,
                payload: pkt.payload.to_vec(),
            });
        }
    }
    frames
}

/// Build the on-wire image (sentinels included) for a packet.
pub fn forge_wire(pkt: &Packet<'_>) -> Vec<u8> {
    let mut body = [0u8; MSG_SIZE_MAX];
    let len = pkt.encode(&mut body).expect("payload within bounds");
    let mut wire = vec![0xA5, 0xA5];
    wire.extend_from_slice(&body[..len]);
    wire.extend_from_slice(&[0x5A, 0x5A]);
    wire
}

/// Deterministic payload bytes for test files.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|index| (index % 251) as u8).collect()
}

/// An empty frame of the given function code with zeroed transfer fields.
pub fn empty_frame(fcode: FCode) -> Packet<'static> {
    Packet {
        fcode,
        rec_file_id: 0,
        rec_feedback: 0,
        snd_file_id: 0,
        snd_chunk_no: 0,
        payload: &[],
    }
}
