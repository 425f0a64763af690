//! Stateless frame codec.
//!
//! A frame is `0x7E | escaped(header ‖ body ‖ checksum) | 0x7E`. This module
//! turns one complete frame into a [`Message`] and back; splitting a byte
//! stream into frames is the job of
//! [`StreamReassembler`](crate::reassembly::StreamReassembler).
//!
//! # Error Handling
//!
//! Every failure is reported as a [`FrameError`]. None of them are fatal to a
//! connection: the reassembler drops the offending frame and keeps going.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

mod bcd;
pub mod error;
mod escape;
mod header;

pub use bcd::{decode_bcd, encode_bcd};
pub use error::FrameError;
pub use escape::{ESCAPE, SENTINEL, checksum, escape, escape_into, unescape};
pub use header::{BodyProperties, Header, MAX_BODY_LEN, ProtocolVersion, SubPackage};

use crate::message::Message;

/// Longest header any protocol generation produces.
pub const MAX_HEADER_LEN: usize = 4 + 1 + 10 + 2 + 4;

/// Longest escaped frame, with every interior byte stuffed.
pub const MAX_FRAME_LEN: usize = 2 * (MAX_HEADER_LEN + MAX_BODY_LEN + 1) + 2;

/// Decode one complete, sentinel-delimited frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] for bad sentinels or escapes,
/// [`FrameError::ChecksumMismatch`] when the trailing byte disagrees with the
/// computed checksum, [`FrameError::InsufficientLength`] for a truncated
/// header and [`FrameError::BodyLengthMismatch`] when the declared body
/// length differs from the bytes present.
///
/// # Examples
///
/// ```
/// use jt808::codec::{Header, ProtocolVersion, decode_frame, encode_frame};
///
/// let header = Header::new(0x0002, "13800138000", ProtocolVersion::V2013).unwrap();
/// let wire = encode_frame(header, b"").unwrap();
/// let message = decode_frame(&wire).unwrap();
/// assert_eq!(message.header.command_id, 0x0002);
/// assert_eq!(message.header.phone, "013800138000");
/// ```
pub fn decode_frame(raw: &[u8]) -> Result<Message, FrameError> {
    let payload = unescape(raw)?;
    let Some((&expected, content)) = payload.split_last() else {
        return Err(FrameError::malformed("frame has no checksum"));
    };
    let actual = checksum(content);
    if actual != expected {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let (header, header_len) = Header::decode(content)?;
    let declared = usize::from(header.properties.body_len);
    let actual = content.len() - header_len;
    if declared != actual {
        return Err(FrameError::BodyLengthMismatch { declared, actual });
    }
    Ok(Message {
        header,
        body: payload.slice(header_len..content.len()),
        raw: Bytes::copy_from_slice(raw),
    })
}

/// Encode `header` and `body` into an escaped frame.
///
/// The body-length subfield is recomputed from `body`.
///
/// # Errors
///
/// Returns [`FrameError::BodyTooLong`] when `body` exceeds [`MAX_BODY_LEN`].
pub fn encode_frame(mut header: Header, body: &[u8]) -> Result<BytesMut, FrameError> {
    let mut dst = BytesMut::with_capacity(MAX_HEADER_LEN + body.len() + 3);
    encode_frame_into(&mut header, body, &mut dst)?;
    Ok(dst)
}

fn encode_frame_into(header: &mut Header, body: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    let mut plain = BytesMut::with_capacity(header.encoded_len() + body.len() + 1);
    header.write_to(body.len(), &mut plain)?;
    plain.extend_from_slice(body);
    let sum = checksum(&plain);
    plain.extend_from_slice(&[sum]);
    escape_into(&plain, dst);
    Ok(())
}

/// Tokio encoder writing [`Message`]s as escaped frames.
///
/// The message header is written as-is apart from the recomputed body
/// length, so callers stamp the reply ID and platform serial beforehand.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameEncoder;

impl Encoder<Message> for FrameEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let Message { mut header, body, .. } = item;
        encode_frame_into(&mut header, &body, dst).map_err(io::Error::from)
    }
}
