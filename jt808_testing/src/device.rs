//! Terminal-side frame builders.

use bytes::BytesMut;
use jt808::{
    codec::{Header, ProtocolVersion, encode_frame},
    handler::command,
};
use rstest::fixture;

/// Phone number used when a test does not pick one.
pub const DEFAULT_PHONE: &str = "13800138000";

/// Directory key the platform derives from [`DEFAULT_PHONE`].
pub const DEFAULT_SESSION_KEY: &str = "013800138000";

/// A frame as a terminal would send it.
///
/// ```rust
/// use jt808_testing::DeviceFrame;
///
/// let bytes = DeviceFrame::new(0x0200).serial(3).body(vec![0; 28]).encode();
/// assert_eq!(bytes.first(), Some(&0x7e));
/// ```
#[derive(Clone, Debug)]
pub struct DeviceFrame {
    command_id: u16,
    phone: String,
    version: ProtocolVersion,
    serial: u16,
    sub_package: Option<(u16, u16)>,
    body: Vec<u8>,
}

impl DeviceFrame {
    /// Empty-bodied frame for `command_id` from [`DEFAULT_PHONE`].
    #[must_use]
    pub fn new(command_id: u16) -> Self {
        Self {
            command_id,
            phone: DEFAULT_PHONE.to_owned(),
            version: ProtocolVersion::V2013,
            serial: 0,
            sub_package: None,
            body: Vec::new(),
        }
    }

    /// Heartbeat with the given serial.
    #[must_use]
    pub fn heartbeat(serial: u16) -> Self { Self::new(command::HEARTBEAT).serial(serial) }

    /// Registration carrying a zeroed body of the minimum length for
    /// `version`.
    #[must_use]
    pub fn registration(serial: u16, version: ProtocolVersion) -> Self {
        let len = jt808::handler::RegistrationHandler::min_body_len(version);
        Self::new(command::REGISTRATION)
            .version(version)
            .serial(serial)
            .body(vec![0; len])
    }

    /// Terminal general reply acknowledging `ack_serial` of `ack_command`.
    #[must_use]
    pub fn terminal_reply(serial: u16, ack_serial: u16, ack_command: u16, result: u8) -> Self {
        let mut body = Vec::with_capacity(5);
        body.extend_from_slice(&ack_serial.to_be_bytes());
        body.extend_from_slice(&ack_command.to_be_bytes());
        body.push(result);
        Self::new(command::TERMINAL_REPLY).serial(serial).body(body)
    }

    /// Send from `phone` instead of [`DEFAULT_PHONE`].
    #[must_use]
    pub fn phone(mut self, phone: &str) -> Self {
        phone.clone_into(&mut self.phone);
        self
    }

    #[must_use]
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn serial(mut self, serial: u16) -> Self {
        self.serial = serial;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Mark the frame as fragment `index` of `total`.
    #[must_use]
    pub fn sub_package(mut self, total: u16, index: u16) -> Self {
        self.sub_package = Some((total, index));
        self
    }

    /// Split `body` into `chunk`-sized fragments with consecutive serials.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is zero or the body needs more than `u16::MAX`
    /// fragments.
    #[must_use]
    pub fn fragments(command_id: u16, first_serial: u16, body: &[u8], chunk: usize) -> Vec<Self> {
        let parts: Vec<&[u8]> = body.chunks(chunk).collect();
        let total = u16::try_from(parts.len()).expect("fragment count fits in u16");
        parts
            .into_iter()
            .zip(1..=total)
            .map(|(part, index)| {
                Self::new(command_id)
                    .serial(first_serial.wrapping_add(index - 1))
                    .sub_package(total, index)
                    .body(part.to_vec())
            })
            .collect()
    }

    /// Encode to wire bytes.
    ///
    /// # Panics
    ///
    /// Panics if the phone number or body is invalid for the frame format.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut header = Header::new(self.command_id, &self.phone, self.version)
            .expect("valid phone number")
            .with_serial(self.serial);
        if let Some((total, index)) = self.sub_package {
            header = header.with_sub_package(total, index);
        }
        encode_frame(header, &self.body).expect("frame encodes")
    }
}

/// Fixture supplying [`DEFAULT_PHONE`].
#[fixture]
pub fn phone_fixture() -> &'static str { DEFAULT_PHONE }
