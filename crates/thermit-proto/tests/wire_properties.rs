//! Property-based tests for the thermit wire layer.
//!
//! These verify the framer and codec invariants for arbitrary inputs, not
//! just the scenario vectors: stream splitting must not change framing
//! results, everything the framer emits must re-verify, and the codecs must
//! round-trip.

use bytes::BytesMut;
use proptest::prelude::*;
use thermit_proto::{
    FCode, Framer, MSG_SIZE_MAX, PAYLOAD_MAX, Packet, Parameters, crc16, enframe,
};

/// Strategy for one of the closed set of function codes.
fn arbitrary_fcode() -> impl Strategy<Value = FCode> {
    prop_oneof![
        Just(FCode::SyncProposal),
        Just(FCode::SyncResponse),
        Just(FCode::SyncAck),
        Just(FCode::DataTransfer),
        Just(FCode::NewFileStart),
        Just(FCode::WriteTerminated),
        Just(FCode::OutOfSync),
    ]
}

/// Strategy for a well-formed wire image: sentinels, body, CRC.
fn arbitrary_wire_frame() -> impl Strategy<Value = Vec<u8>> {
    (
        arbitrary_fcode(),
        any::<[u8; 4]>(),
        prop::collection::vec(any::<u8>(), 0..=PAYLOAD_MAX),
    )
        .prop_map(|(fcode, ids, payload)| {
            let pkt = Packet {
                fcode,
                rec_file_id: ids[0],
                rec_feedback: ids[1],
                snd_file_id: ids[2],
                snd_chunk_no: ids[3],
                payload: &payload,
            };
            let mut body = [0u8; MSG_SIZE_MAX];
            let len = pkt.encode(&mut body).expect("payload within bounds");
            let mut wire = BytesMut::new();
            enframe(&body[..len], &mut wire);
            wire.to_vec()
        })
}

/// Feed a byte stream into a fresh framer and collect every completed body.
fn collect_frames(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    for &byte in stream {
        if framer.follow(byte) {
            frames.push(framer.body().to_vec());
        }
    }
    frames
}

proptest! {
    /// Splitting the stream at any point changes nothing: the framer carries
    /// no state outside itself, so prefix-then-rest equals the whole.
    #[test]
    fn framer_is_split_invariant(
        frames in prop::collection::vec(arbitrary_wire_frame(), 1..4),
        noise in prop::collection::vec(any::<u8>(), 0..64),
        split in any::<prop::sample::Index>(),
    ) {
        let mut stream: Vec<u8> = noise;
        for frame in &frames {
            stream.extend_from_slice(frame);
        }

        let whole = collect_frames(&stream);

        let cut = split.index(stream.len() + 1);
        let mut framer = Framer::new();
        let mut pieces = Vec::new();
        for &byte in &stream[..cut] {
            if framer.follow(byte) {
                pieces.push(framer.body().to_vec());
            }
        }
        for &byte in &stream[cut..] {
            if framer.follow(byte) {
                pieces.push(framer.body().to_vec());
            }
        }

        prop_assert_eq!(whole, pieces);
    }

    /// Everything the framer declares ready re-verifies: the last two body
    /// bytes are the little-endian CRC-16 of the rest.
    #[test]
    fn framer_output_is_crc_sound(stream in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut framer = Framer::new();
        for &byte in &stream {
            if framer.follow(byte) {
                let body = framer.body();
                let split = body.len() - 2;
                let received = u16::from_le_bytes([body[split], body[split + 1]]);
                prop_assert_eq!(received, crc16(&body[..split]));
            }
        }
    }

    /// A clean frame behind sentinel-free garbage is always recovered.
    /// (Garbage containing start sentinels may legally open a bogus frame
    /// that swallows the real one; that case is covered by the split and
    /// CRC-soundness properties instead.)
    #[test]
    fn framer_recovers_frames_from_noise(
        frame in arbitrary_wire_frame(),
        prefix in prop::collection::vec(
            any::<u8>().prop_filter("no start sentinel", |b| *b != 0xA5),
            0..32,
        ),
    ) {
        let mut stream = prefix;
        stream.extend_from_slice(&frame);
        let recovered = collect_frames(&stream);
        let body = &frame[2..frame.len() - 2];
        prop_assert_eq!(recovered.len(), 1);
        prop_assert_eq!(recovered[0].as_slice(), body);
    }

    /// Body encode/parse is the identity on packets.
    #[test]
    fn packet_round_trip(
        fcode in arbitrary_fcode(),
        ids in any::<[u8; 4]>(),
        payload in prop::collection::vec(any::<u8>(), 0..=PAYLOAD_MAX),
    ) {
        let pkt = Packet {
            fcode,
            rec_file_id: ids[0],
            rec_feedback: ids[1],
            snd_file_id: ids[2],
            snd_chunk_no: ids[3],
            payload: &payload,
        };
        let mut buf = [0u8; MSG_SIZE_MAX];
        let len = pkt.encode(&mut buf).expect("payload within bounds");
        prop_assert_eq!(len, payload.len() + 8);
        let parsed = Packet::parse(&buf[..len]).expect("own encoding parses");
        prop_assert_eq!(parsed, pkt);
    }

    /// The parser never accepts a body whose length field disagrees with the
    /// body length, regardless of content.
    #[test]
    fn packet_parse_never_panics(body in prop::collection::vec(any::<u8>(), 0..160)) {
        let _ = Packet::parse(&body);
    }

    /// Parameter serialization is a 10-byte bijection.
    #[test]
    fn parameters_round_trip(fields in any::<[u16; 5]>()) {
        let params = Parameters {
            version: fields[0],
            chunk_size: fields[1],
            max_file_size: fields[2],
            keep_alive_ms: fields[3],
            burst_length: fields[4],
        };
        let wire = params.to_wire();
        prop_assert_eq!(Parameters::from_wire(&wire).expect("fixed length"), params);
    }

    /// best_common is commutative and idempotent, so either peer can
    /// recompute the compromise and land on the same set.
    #[test]
    fn best_common_algebra(a in any::<[u16; 5]>(), b in any::<[u16; 5]>()) {
        let pa = Parameters {
            version: a[0],
            chunk_size: a[1],
            max_file_size: a[2],
            keep_alive_ms: a[3],
            burst_length: a[4],
        };
        let pb = Parameters {
            version: b[0],
            chunk_size: b[1],
            max_file_size: b[2],
            keep_alive_ms: b[3],
            burst_length: b[4],
        };
        let common = pa.best_common(&pb);
        prop_assert_eq!(common, pb.best_common(&pa));
        prop_assert_eq!(common.best_common(&pb), common);
        prop_assert_eq!(common.best_common(&pa), common);
        prop_assert_eq!(common.best_common(&common), common);
    }
}
