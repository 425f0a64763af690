//! Byte-stuffing and checksum primitives.
//!
//! Inside a frame `0x7E` and `0x7D` never appear raw: they are written as
//! `7D 02` and `7D 01` so the sentinel stays unique on the wire.

use bytes::{BufMut, Bytes, BytesMut};

use super::FrameError;

/// Byte marking the start and end of every frame.
pub const SENTINEL: u8 = 0x7e;
/// Lead byte of a two-byte escape sequence.
pub const ESCAPE: u8 = 0x7d;

const ESCAPED_ESCAPE: u8 = 0x01;
const ESCAPED_SENTINEL: u8 = 0x02;

/// XOR of every byte in `bytes`.
///
/// # Examples
///
/// ```
/// use jt808::codec::checksum;
///
/// assert_eq!(checksum(&[0x01, 0x02, 0x04]), 0x07);
/// assert_eq!(checksum(&[]), 0x00);
/// ```
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 { bytes.iter().fold(0, |acc, b| acc ^ b) }

/// Strip sentinels from `raw` and reverse the byte-stuffing.
///
/// A dangling escape byte is accepted only as the last interior byte: some
/// terminals forget to escape a checksum that happens to equal `0x7D`.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when `raw` is not sentinel-delimited,
/// holds no interior bytes, or contains an invalid escape sequence.
pub fn unescape(raw: &[u8]) -> Result<Bytes, FrameError> {
    if raw.len() <= 2 {
        return Err(FrameError::malformed("frame shorter than three bytes"));
    }
    if raw.first() != Some(&SENTINEL) || raw.last() != Some(&SENTINEL) {
        return Err(FrameError::malformed("frame not delimited by 0x7e"));
    }
    let interior = &raw[1..raw.len() - 1];
    if !interior.contains(&ESCAPE) {
        return Ok(Bytes::copy_from_slice(interior));
    }

    let mut out = BytesMut::with_capacity(interior.len());
    let mut iter = interior.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        if byte != ESCAPE {
            out.put_u8(byte);
            continue;
        }
        match iter.peek().copied() {
            Some(ESCAPED_ESCAPE) => {
                iter.next();
                out.put_u8(ESCAPE);
            }
            Some(ESCAPED_SENTINEL) => {
                iter.next();
                out.put_u8(SENTINEL);
            }
            None => out.put_u8(ESCAPE),
            Some(_) => return Err(FrameError::malformed("invalid escape sequence")),
        }
    }
    Ok(out.freeze())
}

/// Byte-stuff `payload` and wrap it in sentinels.
///
/// # Examples
///
/// ```
/// use jt808::codec::escape;
///
/// assert_eq!(&escape(&[0x30, 0x7e, 0x7d])[..], &[0x7e, 0x30, 0x7d, 0x02, 0x7d, 0x01, 0x7e]);
/// ```
#[must_use]
pub fn escape(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    escape_into(payload, &mut out);
    out
}

/// Byte-stuff `payload` into `dst`, including both sentinels.
pub fn escape_into(payload: &[u8], dst: &mut BytesMut) {
    let extra = payload
        .iter()
        .filter(|b| matches!(**b, SENTINEL | ESCAPE))
        .count();
    dst.reserve(payload.len() + extra + 2);
    dst.put_u8(SENTINEL);
    for &byte in payload {
        match byte {
            SENTINEL => dst.put_slice(&[ESCAPE, ESCAPED_SENTINEL]),
            ESCAPE => dst.put_slice(&[ESCAPE, ESCAPED_ESCAPE]),
            other => dst.put_u8(other),
        }
    }
    dst.put_u8(SENTINEL);
}
