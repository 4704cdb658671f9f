#![no_main]

use bytes::BytesMut;
use edb_protocol::{ClientMessage, DEFAULT_MAX_FRAME_SIZE, Frame, ServerMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    // Stop at the first incomplete or malformed frame.
    while let Ok(Some(frame)) = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE) {
        let _ = ServerMessage::decode(&frame);
        let _ = ClientMessage::decode(&frame);
    }
});
