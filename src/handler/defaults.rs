//! Built-in handlers for the baseline commands.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Handler, HandlerError, ReplyResult, put_u16};
use crate::{codec::ProtocolVersion, message::Message};

/// Command IDs used by the built-in handlers.
pub mod command {
    /// Terminal general reply.
    pub const TERMINAL_REPLY: u16 = 0x0001;
    /// Terminal heartbeat.
    pub const HEARTBEAT: u16 = 0x0002;
    /// Terminal registration.
    pub const REGISTRATION: u16 = 0x0100;
    /// Terminal authentication.
    pub const AUTHENTICATION: u16 = 0x0102;
    /// Location report.
    pub const LOCATION_REPORT: u16 = 0x0200;
    /// Batch location upload.
    pub const BATCH_LOCATION_REPORT: u16 = 0x0704;
    /// Platform general reply.
    pub const PLATFORM_REPLY: u16 = 0x8001;
    /// Registration reply.
    pub const REGISTRATION_REPLY: u16 = 0x8100;
}

/// Body of a platform general reply: `ack serial | ack ID | result`.
#[must_use]
pub fn general_reply_body(message: &Message, result: ReplyResult) -> Bytes {
    let mut body = BytesMut::with_capacity(5);
    put_u16(&mut body, message.serial());
    put_u16(&mut body, message.command_id());
    body.put_u8(result as u8);
    body.freeze()
}

fn require_len(message: &Message, need: usize) -> Result<(), HandlerError> {
    let have = message.body.len();
    if have < need {
        return Err(HandlerError::BodyTooShort {
            command_id: message.command_id(),
            have,
            need,
        });
    }
    Ok(())
}

/// Handler answering with the platform general reply (`0x8001`).
#[derive(Clone, Copy, Debug)]
pub struct GeneralReplyHandler {
    command_id: u16,
    min_body_len: usize,
}

impl GeneralReplyHandler {
    /// General-reply handler for any command with at least `min_body_len`
    /// body bytes.
    #[must_use]
    pub const fn new(command_id: u16, min_body_len: usize) -> Self {
        Self {
            command_id,
            min_body_len,
        }
    }

    /// Authentication (`0x0102`); the body carries the auth code.
    #[must_use]
    pub const fn authentication() -> Self { Self::new(command::AUTHENTICATION, 1) }

    /// Heartbeat (`0x0002`); empty body.
    #[must_use]
    pub const fn heartbeat() -> Self { Self::new(command::HEARTBEAT, 0) }

    /// Location report (`0x0200`); 28-byte basic location block.
    #[must_use]
    pub const fn location_report() -> Self { Self::new(command::LOCATION_REPORT, 28) }

    /// Batch location upload (`0x0704`); item count and data type.
    #[must_use]
    pub const fn batch_location_report() -> Self { Self::new(command::BATCH_LOCATION_REPORT, 3) }
}

impl Handler for GeneralReplyHandler {
    fn command_id(&self) -> u16 { self.command_id }

    fn reply_id(&self) -> u16 { command::PLATFORM_REPLY }

    fn decode(&self, message: &Message) -> Result<(), HandlerError> {
        require_len(message, self.min_body_len)
    }

    fn build_reply(&self, message: &Message) -> Result<Bytes, HandlerError> {
        Ok(general_reply_body(message, ReplyResult::Success))
    }
}

/// Registration (`0x0100`) answered with `0x8100`.
///
/// The reply carries `ack serial | result | auth code`; the auth code is the
/// device phone number.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationHandler;

impl RegistrationHandler {
    /// Create the handler.
    #[must_use]
    pub const fn new() -> Self { Self }

    /// Fixed-layout prefix of the registration body before the plate number.
    #[must_use]
    pub const fn min_body_len(version: ProtocolVersion) -> usize {
        match version {
            ProtocolVersion::V2011 => 25,
            ProtocolVersion::V2013 => 37,
            ProtocolVersion::V2019 => 76,
        }
    }
}

impl Handler for RegistrationHandler {
    fn command_id(&self) -> u16 { command::REGISTRATION }

    fn reply_id(&self) -> u16 { command::REGISTRATION_REPLY }

    fn decode(&self, message: &Message) -> Result<(), HandlerError> {
        let version = message.header.version;
        let need = Self::min_body_len(version);
        if message.body.len() < need && version == ProtocolVersion::V2013 {
            // Legacy terminals share the mid-generation header; accept their
            // shorter body layout.
            return require_len(message, Self::min_body_len(ProtocolVersion::V2011));
        }
        require_len(message, need)
    }

    fn build_reply(&self, message: &Message) -> Result<Bytes, HandlerError> {
        let auth_code = message.phone().as_bytes();
        let mut body = BytesMut::with_capacity(3 + auth_code.len());
        put_u16(&mut body, message.serial());
        body.put_u8(0);
        body.put_slice(auth_code);
        Ok(body.freeze())
    }
}

/// Terminal general reply (`0x0001`), which the platform never answers.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalReplyHandler;

impl Handler for TerminalReplyHandler {
    fn command_id(&self) -> u16 { command::TERMINAL_REPLY }

    fn reply_id(&self) -> u16 { command::PLATFORM_REPLY }

    fn decode(&self, message: &Message) -> Result<(), HandlerError> { require_len(message, 5) }

    fn wants_reply(&self) -> bool { false }

    fn build_reply(&self, _message: &Message) -> Result<Bytes, HandlerError> { Ok(Bytes::new()) }
}
