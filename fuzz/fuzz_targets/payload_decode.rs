//! Fuzz target for the structured payload decoders.

#![no_main]

use libfuzzer_sys::fuzz_target;
use thermit_proto::{FileInfo, Parameters, FILE_INFO_MAX};

fuzz_target!(|data: &[u8]| {
    if let Ok(params) = Parameters::from_wire(data) {
        assert_eq!(&params.to_wire()[..], data);
    }

    if let Ok(info) = FileInfo::parse(data) {
        let mut buf = [0u8; FILE_INFO_MAX];
        // Re-encoding succeeds for every accepted record; byte equality is
        // not guaranteed because the parser tolerates a missing NUL.
        info.encode(&mut buf).expect("accepted record re-encodes");
    }
});
