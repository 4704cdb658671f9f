#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use edb_types::{Codec, ScalarCodec};
use libfuzzer_sys::fuzz_target;

const SCALARS: [ScalarCodec; 15] = [
    ScalarCodec::Uuid,
    ScalarCodec::Str,
    ScalarCodec::Bytes,
    ScalarCodec::Int16,
    ScalarCodec::Int32,
    ScalarCodec::Int64,
    ScalarCodec::Float32,
    ScalarCodec::Float64,
    ScalarCodec::Bool,
    ScalarCodec::Json,
    ScalarCodec::Datetime,
    ScalarCodec::LocalDatetime,
    ScalarCodec::LocalDate,
    ScalarCodec::LocalTime,
    ScalarCodec::Duration,
];

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    scalar: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let scalar = SCALARS[usize::from(input.scalar) % SCALARS.len()];
    let codec = Codec::Scalar(scalar);
    if let Ok(value) = codec.decode(&input.data) {
        // Whatever decodes must encode back.
        let mut buf = BytesMut::new();
        codec
            .encode(&mut buf, &value)
            .unwrap_or_else(|e| panic!("{} value failed to re-encode: {e}", scalar.name()));
    }
});
