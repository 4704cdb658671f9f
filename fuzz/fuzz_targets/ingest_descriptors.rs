#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use edb_types::CodecCache;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Descriptor block as sent in `CommandDataDescription`.
    block: Vec<u8>,
    /// Row data decoded with every codec the block yields.
    row: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let mut cache = CodecCache::new();
    let Ok(ids) = cache.ingest(&Bytes::from(input.block)) else {
        return;
    };
    for id in ids {
        // Cycles, unknown scalars and deep nesting must fail cleanly.
        if let Ok(codec) = cache.codec_for(id) {
            let _ = codec.decode(&input.row);
        }
    }
});
