//! Low-level encoding and decoding helpers.
//!
//! All integers are big-endian. Strings and byte strings carry a `u32`
//! length prefix. Every reader checks the remaining length first and reports
//! truncation instead of panicking.

use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Key/value annotations attached to several messages.
pub type Annotations = Vec<(String, String)>;

/// Fail with [`ProtocolError::Truncated`] unless `needed` bytes remain.
pub fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: src.remaining(),
        });
    }
    Ok(())
}

/// Read a `u8`.
pub fn read_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a big-endian `u16`.
pub fn read_u16(src: &mut impl Buf) -> Result<u16, ProtocolError> {
    ensure(src, 2)?;
    Ok(src.get_u16())
}

/// Read a big-endian `u32`.
pub fn read_u32(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

/// Read a big-endian `i32`.
pub fn read_i32(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

/// Read a big-endian `u64`.
pub fn read_u64(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_u64())
}

/// Read a 16-byte UUID.
pub fn read_uuid(src: &mut impl Buf) -> Result<Uuid, ProtocolError> {
    ensure(src, 16)?;
    let mut raw = [0u8; 16];
    src.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

/// Read a `u32`-length-prefixed byte string.
pub fn read_bytes(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = read_u32(src)? as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read a `u32`-length-prefixed UTF-8 string.
pub fn read_string(src: &mut impl Buf, what: &'static str) -> Result<String, ProtocolError> {
    let raw = read_bytes(src)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(what))
}

/// Read a `u16`-counted list of string pairs.
pub fn read_annotations(src: &mut impl Buf) -> Result<Annotations, ProtocolError> {
    let count = read_u16(src)?;
    let mut out = Vec::with_capacity(usize::from(count).min(64));
    for _ in 0..count {
        let name = read_string(src, "annotation name")?;
        let value = read_string(src, "annotation value")?;
        out.push((name, value));
    }
    Ok(out)
}

/// Write a `u32`-length-prefixed byte string.
pub fn write_bytes(dst: &mut impl BufMut, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::TooLong {
        field: "bytes",
        len: data.len(),
    })?;
    dst.put_u32(len);
    dst.put_slice(data);
    Ok(())
}

/// Write a `u32`-length-prefixed UTF-8 string.
pub fn write_string(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    write_bytes(dst, s.as_bytes())
}

/// Write a 16-byte UUID.
pub fn write_uuid(dst: &mut impl BufMut, id: &Uuid) {
    dst.put_slice(id.as_bytes());
}

/// Write a `u16`-counted list of string pairs.
pub fn write_annotations(
    dst: &mut impl BufMut,
    items: &[(String, String)],
) -> Result<(), ProtocolError> {
    let count = u16::try_from(items.len()).map_err(|_| ProtocolError::TooLong {
        field: "annotations",
        len: items.len(),
    })?;
    dst.put_u16(count);
    for (name, value) in items {
        write_string(dst, name)?;
        write_string(dst, value)?;
    }
    Ok(())
}

/// Fail if `src` still has unread bytes after `message` was decoded.
pub fn expect_end(src: &impl Buf, message: &'static str) -> Result<(), ProtocolError> {
    if src.has_remaining() {
        return Err(ProtocolError::TrailingBytes {
            message,
            extra: src.remaining(),
        });
    }
    Ok(())
}
