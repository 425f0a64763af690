//! Binary-coded decimal helpers for device phone numbers.

use bytes::Bytes;

use super::FrameError;

/// Decode BCD `bytes` into decimal digits, dropping leading all-zero bytes.
///
/// Only whole padding bytes are removed so a twelve-digit number stored in
/// six bytes keeps a leading `0` digit, while the same number left-padded to
/// ten bytes decodes identically.
///
/// # Errors
///
/// Returns [`FrameError::InvalidBcd`] if any nibble is greater than nine.
///
/// # Examples
///
/// ```
/// use jt808::codec::decode_bcd;
///
/// let phone = decode_bcd(&[0x00, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01]).unwrap();
/// assert_eq!(phone, "012345678901");
/// ```
pub fn decode_bcd(bytes: &[u8]) -> Result<String, FrameError> {
    let significant = bytes
        .iter()
        .position(|b| *b != 0)
        .map_or(&[][..], |start| &bytes[start..]);
    let mut digits = String::with_capacity(significant.len() * 2);
    for &byte in significant {
        let (high, low) = (byte >> 4, byte & 0x0f);
        if high > 9 || low > 9 {
            return Err(FrameError::InvalidBcd { byte });
        }
        digits.push(char::from(b'0' + high));
        digits.push(char::from(b'0' + low));
    }
    Ok(digits)
}

/// Encode decimal `digits` as `width` BCD bytes, left-padding with zeros.
///
/// # Errors
///
/// Returns [`FrameError::InvalidBcd`] if `digits` holds a non-digit character
/// or more digits than `width` bytes can carry.
pub fn encode_bcd(digits: &str, width: usize) -> Result<Bytes, FrameError> {
    if let Some(bad) = digits.bytes().find(|b| !b.is_ascii_digit()) {
        return Err(FrameError::InvalidBcd { byte: bad });
    }
    let capacity = width * 2;
    if digits.len() > capacity {
        return Err(FrameError::InvalidBcd { byte: digits.as_bytes()[0] });
    }
    let padded = format!("{digits:0>capacity$}");
    let packed = padded
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
        .collect::<Vec<_>>();
    Ok(Bytes::from(packed))
}
