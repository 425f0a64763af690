//! Error types for the frame codec.
//!
//! [`FrameError`] covers everything that can go wrong while turning wire
//! bytes into a [`Message`](crate::message::Message) or back:
//!
//! - structural problems with the sentinel-delimited frame (bad sentinels,
//!   dangling escape bytes, an unbounded accumulation buffer);
//! - integrity failures (checksum mismatch, declared body length disagreeing
//!   with the bytes present);
//! - truncated headers and malformed sub-package metadata.
//!
//! Every variant is recoverable at the connection level: the offending frame
//! is discarded and decoding continues with the next one.

use std::io;

use thiserror::Error;

/// Errors raised while decoding or encoding a single frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Sentinels are missing, the frame is too short, or an escape sequence
    /// is invalid.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Short description of the structural problem.
        reason: &'static str,
    },

    /// Trailing checksum byte disagrees with the XOR of header and body.
    #[error("frame checksum mismatch: expected {expected:#04x}, computed {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame.
        expected: u8,
        /// Checksum computed over the unescaped header and body.
        actual: u8,
    },

    /// Not enough bytes were available to decode a header region.
    #[error("insufficient length for {field}: have {have}, need {need}")]
    InsufficientLength {
        /// Header region that was truncated.
        field: &'static str,
        /// Bytes available.
        have: usize,
        /// Bytes required.
        need: usize,
    },

    /// Body length declared in the property field differs from the body
    /// bytes actually present.
    #[error("body length mismatch: declared {declared}, actual {actual}")]
    BodyLengthMismatch {
        /// Length from the ten-bit property subfield.
        declared: usize,
        /// Length of the decoded body slice.
        actual: usize,
    },

    /// Outbound body does not fit the ten-bit length subfield.
    #[error("body too long: {len} bytes exceeds {max}")]
    BodyTooLong {
        /// Length of the rejected body.
        len: usize,
        /// Largest encodable body.
        max: usize,
    },

    /// A phone number nibble or digit is not a decimal digit.
    #[error("invalid BCD byte {byte:#04x}")]
    InvalidBcd {
        /// Offending byte, or the offending character for encoding.
        byte: u8,
    },

    /// Sub-package metadata is inconsistent.
    #[error("invalid sub-package: index {index} of {total}")]
    InvalidSubPackage {
        /// Declared total number of fragments.
        total: u16,
        /// Index carried by the fragment.
        index: u16,
    },

    /// Buffered bytes exceeded the largest legal frame without a closing
    /// sentinel.
    #[error("frame buffer overflow: {size} bytes exceeds {max}")]
    Oversized {
        /// Bytes buffered when the overflow was detected.
        size: usize,
        /// Largest escaped frame the reassembler accepts.
        max: usize,
    },
}

impl FrameError {
    /// Shorthand for [`FrameError::Malformed`].
    #[must_use]
    pub const fn malformed(reason: &'static str) -> Self { Self::Malformed { reason } }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self { io::Error::new(io::ErrorKind::InvalidData, err) }
}
