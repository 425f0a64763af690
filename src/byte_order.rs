//! Helpers for explicit network byte-order conversions.
//!
//! Every multi-byte integer in a frame header or platform reply body is
//! big-endian. These helpers keep Clippy expectations scoped to the
//! conversion points so protocol code stays explicit about wire endianness.

/// Serialise a `u16` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use jt808::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(0x0100), [0x01, 0x00]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use jt808::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x80, 0x01]), 0x8001);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Read a network-order `u16` starting at `offset`, if enough bytes remain.
#[must_use]
pub fn read_u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let pair = bytes.get(offset..end)?;
    <[u8; 2]>::try_from(pair).ok().map(read_network_u16)
}
