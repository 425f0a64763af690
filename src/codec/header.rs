//! Version-aware message header.
//!
//! ```text
//! ID(2) | Property(2) | [VersionMarker(1) if V2019]
//!       | Phone_BCD(6 | 10) | Serial(2) | [SubTotal(2) SubIndex(2)]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::{FrameError, bcd};
use crate::byte_order::{read_u16_at, write_network_u16};

/// Largest body the ten-bit length subfield can describe.
pub const MAX_BODY_LEN: usize = 0x03ff;

const BODY_LEN_MASK: u16 = 0x03ff;

const VERSION_BIT: u16 = 1 << 14;
const SUB_PACKAGE_BIT: u16 = 1 << 13;
const ENCRYPTION_SHIFT: u16 = 10;
const ENCRYPTION_MASK: u16 = 0b111;
const RESERVED_BIT: u16 = 1 << 15;

/// Protocol generation spoken by a terminal.
///
/// The header layout only distinguishes the extended generation: the legacy
/// and mid generations share a six-byte phone field and no version marker,
/// so decoding always yields [`ProtocolVersion::V2013`] for them. Callers
/// that can tell the two apart from a message body may override the field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Earliest generation.
    V2011,
    /// Mid generation.
    #[default]
    V2013,
    /// Extended generation with a version marker and ten-byte phone.
    V2019,
}

impl ProtocolVersion {
    /// Width of the BCD phone field in bytes.
    #[must_use]
    pub const fn phone_len(self) -> usize {
        match self {
            Self::V2019 => 10,
            Self::V2011 | Self::V2013 => 6,
        }
    }

    /// Whether a version-marker byte follows the property field.
    #[must_use]
    pub const fn has_version_marker(self) -> bool { matches!(self, Self::V2019) }
}

/// Decoded body-property bitfield.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BodyProperties {
    /// Reserved high bit, preserved as received.
    pub reserved: bool,
    /// Set by extended-generation terminals.
    pub version_flag: bool,
    /// The header carries sub-package total and index fields.
    pub sub_package: bool,
    /// Three-bit encryption selector; zero means plaintext.
    pub encryption: u8,
    /// Declared body length.
    pub body_len: u16,
}

impl BodyProperties {
    /// Unpack the property word.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "value is masked to three bits"
        )]
        let encryption = ((bits >> ENCRYPTION_SHIFT) & ENCRYPTION_MASK) as u8;
        Self {
            reserved: bits & RESERVED_BIT != 0,
            version_flag: bits & VERSION_BIT != 0,
            sub_package: bits & SUB_PACKAGE_BIT != 0,
            encryption,
            body_len: bits & BODY_LEN_MASK,
        }
    }

    /// Pack the property word.
    #[must_use]
    pub fn to_bits(self) -> u16 {
        let mut bits = self.body_len & BODY_LEN_MASK;
        bits |= (u16::from(self.encryption) & ENCRYPTION_MASK) << ENCRYPTION_SHIFT;
        if self.sub_package {
            bits |= SUB_PACKAGE_BIT;
        }
        if self.version_flag {
            bits |= VERSION_BIT;
        }
        if self.reserved {
            bits |= RESERVED_BIT;
        }
        bits
    }
}

/// Position of a fragment within a sub-packaged message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubPackage {
    /// Total number of fragments.
    pub total: u16,
    /// One-based index of this fragment.
    pub index: u16,
}

/// Message header shared by inbound frames and the replies derived from them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Command identifier.
    pub command_id: u16,
    /// Body-property bitfield as last decoded or encoded.
    pub properties: BodyProperties,
    /// Protocol generation, which drives the header shape.
    pub version: ProtocolVersion,
    /// Protocol version number carried by extended-generation headers.
    pub version_marker: u8,
    /// Device phone number in decimal digits.
    pub phone: String,
    phone_bcd: Bytes,
    /// Message serial number.
    pub serial: u16,
    /// Fragment position when the message is sub-packaged.
    pub sub_package: Option<SubPackage>,
}

impl Header {
    /// Build a header for `phone` speaking `version`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidBcd`] when `phone` is not a decimal
    /// string that fits the version's phone field.
    pub fn new(command_id: u16, phone: &str, version: ProtocolVersion) -> Result<Self, FrameError> {
        let phone_bcd = bcd::encode_bcd(phone, version.phone_len())?;
        Ok(Self {
            command_id,
            properties: BodyProperties {
                version_flag: version.has_version_marker(),
                ..BodyProperties::default()
            },
            version,
            version_marker: u8::from(version.has_version_marker()),
            phone: bcd::decode_bcd(&phone_bcd)?,
            phone_bcd,
            serial: 0,
            sub_package: None,
        })
    }

    /// Set the serial number.
    #[must_use]
    pub fn with_serial(mut self, serial: u16) -> Self {
        self.serial = serial;
        self
    }

    /// Mark the header as fragment `index` of `total`.
    #[must_use]
    pub fn with_sub_package(mut self, total: u16, index: u16) -> Self {
        self.sub_package = Some(SubPackage { total, index });
        self.properties.sub_package = true;
        self
    }

    /// Raw BCD phone bytes exactly as received.
    #[must_use]
    pub fn phone_bcd(&self) -> &[u8] { &self.phone_bcd }

    /// Turn an inbound header into the header of a platform frame.
    ///
    /// The ID and serial positions take `command_id` and the platform serial
    /// number; the device's BCD phone encoding and protocol generation are
    /// kept verbatim. Outbound frames are never fragmented or encrypted.
    #[must_use]
    pub fn into_reply(mut self, command_id: u16, platform_serial: u16) -> Self {
        self.command_id = command_id;
        self.serial = platform_serial;
        self.sub_package = None;
        self.properties.sub_package = false;
        self.properties.encryption = 0;
        self
    }

    /// Number of bytes this header occupies on the wire before escaping.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        4 + usize::from(self.version.has_version_marker())
            + self.phone_bcd.len()
            + 2
            + if self.sub_package.is_some() { 4 } else { 0 }
    }

    /// Decode a header from the start of `bytes`, returning it with the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InsufficientLength`] if the fixed fields, the
    /// version-dependent phone and serial region, or the sub-package fields
    /// are truncated, and [`FrameError::InvalidBcd`] for a corrupt phone.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        let (Some(command_id), Some(bits)) = (read_u16_at(bytes, 0), read_u16_at(bytes, 2)) else {
            return Err(FrameError::InsufficientLength {
                field: "id and properties",
                have: bytes.len(),
                need: 4,
            });
        };
        let properties = BodyProperties::from_bits(bits);
        let version = if properties.version_flag {
            ProtocolVersion::V2019
        } else {
            ProtocolVersion::V2013
        };

        let mut offset = 4;
        let marker_len = usize::from(version.has_version_marker());
        let need = offset + marker_len + version.phone_len() + 2;
        if bytes.len() < need {
            return Err(FrameError::InsufficientLength {
                field: "phone and serial",
                have: bytes.len(),
                need,
            });
        }
        let version_marker = if version.has_version_marker() {
            let marker = bytes[offset];
            offset += 1;
            marker
        } else {
            0
        };
        let phone_bcd = Bytes::copy_from_slice(&bytes[offset..offset + version.phone_len()]);
        offset += version.phone_len();
        let serial = read_u16_at(bytes, offset).unwrap_or_default();
        offset += 2;

        let sub_package = if properties.sub_package {
            let (Some(total), Some(index)) =
                (read_u16_at(bytes, offset), read_u16_at(bytes, offset + 2))
            else {
                return Err(FrameError::InsufficientLength {
                    field: "sub-package",
                    have: bytes.len(),
                    need: offset + 4,
                });
            };
            offset += 4;
            Some(SubPackage { total, index })
        } else {
            None
        };

        let header = Self {
            command_id,
            properties,
            version,
            version_marker,
            phone: bcd::decode_bcd(&phone_bcd)?,
            phone_bcd,
            serial,
            sub_package,
        };
        Ok((header, offset))
    }

    /// Write the header for a body of `body_len` bytes, updating the stored
    /// property word to match what was written.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLong`] when `body_len` exceeds
    /// [`MAX_BODY_LEN`].
    pub fn write_to(&mut self, body_len: usize, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = u16::try_from(body_len)
            .ok()
            .filter(|len| usize::from(*len) <= MAX_BODY_LEN)
            .ok_or(FrameError::BodyTooLong {
                len: body_len,
                max: MAX_BODY_LEN,
            })?;
        self.properties.body_len = len;
        self.properties.sub_package = self.sub_package.is_some();
        self.properties.version_flag = self.version.has_version_marker();

        dst.reserve(self.encoded_len());
        dst.put_slice(&write_network_u16(self.command_id));
        dst.put_slice(&write_network_u16(self.properties.to_bits()));
        if self.version.has_version_marker() {
            dst.put_u8(self.version_marker);
        }
        dst.put_slice(&self.phone_bcd);
        dst.put_slice(&write_network_u16(self.serial));
        if let Some(SubPackage { total, index }) = self.sub_package {
            dst.put_slice(&write_network_u16(total));
            dst.put_slice(&write_network_u16(index));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x002c, BodyProperties { body_len: 44, ..BodyProperties::default() })]
    #[case(0x4000 | 0x2000 | (0b001 << 10) | 0x3ff, BodyProperties {
        version_flag: true,
        sub_package: true,
        encryption: 1,
        body_len: 1023,
        ..BodyProperties::default()
    })]
    #[case(0x8000, BodyProperties { reserved: true, ..BodyProperties::default() })]
    fn property_bits_round_trip(#[case] bits: u16, #[case] expected: BodyProperties) {
        assert_eq!(BodyProperties::from_bits(bits), expected);
        assert_eq!(expected.to_bits(), bits);
    }

    #[test]
    fn decodes_mid_generation_header() {
        let bytes = [
            0x01, 0x00, 0x00, 0x2c, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x00, 0x07,
        ];
        let (header, consumed) = Header::decode(&bytes).expect("valid header");
        assert_eq!(consumed, 12);
        assert_eq!(header.command_id, 0x0100);
        assert_eq!(header.version, ProtocolVersion::V2013);
        assert_eq!(header.phone, "012345678901");
        assert_eq!(header.serial, 7);
        assert_eq!(header.sub_package, None);
    }

    #[test]
    fn decodes_extended_generation_header_with_sub_package() {
        let bytes = [
            0x08, 0x01, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x38, 0x00, 0x13, 0x80,
            0x00, 0x00, 0x09, 0x00, 0x03, 0x00, 0x02,
        ];
        let (header, consumed) = Header::decode(&bytes).expect("valid header");
        assert_eq!(consumed, bytes.len());
        assert_eq!(header.version, ProtocolVersion::V2019);
        assert_eq!(header.version_marker, 1);
        assert_eq!(header.phone, "013800138000");
        assert_eq!(header.phone_bcd().len(), 10);
        assert_eq!(header.serial, 9);
        assert_eq!(header.sub_package, Some(SubPackage { total: 3, index: 2 }));
    }

    #[rstest]
    #[case::fixed_fields(&[0x01, 0x00, 0x00], "id and properties")]
    #[case::phone(&[0x01, 0x00, 0x00, 0x00, 0x01, 0x23], "phone and serial")]
    #[case::extended_phone(
        &[0x01, 0x00, 0x40, 0x00, 0x01, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x00, 0x01],
        "phone and serial"
    )]
    #[case::sub_package(
        &[0x01, 0x00, 0x20, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x00, 0x01, 0x00, 0x02],
        "sub-package"
    )]
    fn rejects_truncated_headers(#[case] bytes: &[u8], #[case] expected_field: &str) {
        match Header::decode(bytes) {
            Err(FrameError::InsufficientLength { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected insufficient length, got {other:?}"),
        }
    }

    #[test]
    fn reply_keeps_phone_encoding_and_replaces_id_and_serial() {
        let header = Header::new(0x0200, "13800138000", ProtocolVersion::V2019)
            .expect("valid phone")
            .with_serial(41)
            .with_sub_package(2, 1);
        let bcd = header.phone_bcd().to_vec();
        let reply = header.into_reply(0x8001, 5);
        assert_eq!(reply.command_id, 0x8001);
        assert_eq!(reply.serial, 5);
        assert_eq!(reply.phone_bcd(), &bcd[..]);
        assert_eq!(reply.sub_package, None);
        assert_eq!(reply.version, ProtocolVersion::V2019);
    }

    #[test]
    fn write_rejects_oversized_body() {
        let mut header = Header::new(0x8001, "1", ProtocolVersion::V2013).expect("valid phone");
        let mut dst = BytesMut::new();
        assert_eq!(
            header.write_to(1024, &mut dst),
            Err(FrameError::BodyTooLong { len: 1024, max: 1023 })
        );
        assert!(dst.is_empty());
    }
}
