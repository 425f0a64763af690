//! Pluggable per-command behaviour.
//!
//! A [`Handler`] owns everything command-specific: validating the body,
//! deciding whether the platform answers, and producing the answer. The
//! connection engine only looks handlers up by command ID in a
//! [`HandlerRegistry`], so new commands plug in without touching it.

use std::{collections::HashMap, fmt, io, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

mod defaults;

pub use defaults::{
    GeneralReplyHandler,
    RegistrationHandler,
    TerminalReplyHandler,
    command,
    general_reply_body,
};

use crate::{byte_order::write_network_u16, message::Message};

/// Errors a handler reports while decoding a body or building a reply.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Body is shorter than the command's fixed layout.
    #[error("body of command {command_id:#06x} too short: have {have}, need {need}")]
    BodyTooShort {
        /// Command whose body was rejected.
        command_id: u16,
        /// Bytes present.
        have: usize,
        /// Bytes required.
        need: usize,
    },
    /// Body violates the command's layout in some other way.
    #[error("invalid body for command {command_id:#06x}: {reason}")]
    InvalidBody {
        /// Command whose body was rejected.
        command_id: u16,
        /// Description of the problem.
        reason: String,
    },
}

/// Result codes carried by the platform general reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyResult {
    /// Request accepted.
    Success = 0,
    /// Request rejected.
    Failure = 1,
    /// Message could not be parsed.
    MessageError = 2,
    /// Command not supported.
    Unsupported = 3,
    /// Alarm acknowledged.
    AlarmAcknowledged = 4,
}

/// Capability contract implemented for each command ID.
///
/// Handlers are shared between a connection's read and write paths, so all
/// methods take `&self`. `on_read` and `on_write` exist for external side
/// effects only and have no influence on control flow.
pub trait Handler: Send + Sync + 'static {
    /// Command ID this handler serves.
    fn command_id(&self) -> u16;

    /// Command ID stamped on the platform's reply.
    fn reply_id(&self) -> u16;

    /// Validate and decode the message body.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the body does not match the command's
    /// layout; the message is then dropped.
    fn decode(&self, _message: &Message) -> Result<(), HandlerError> { Ok(()) }

    /// Whether the platform answers this command at all.
    fn wants_reply(&self) -> bool { true }

    /// Produce the reply body for `message`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if no reply can be built; nothing is
    /// written in that case.
    fn build_reply(&self, message: &Message) -> Result<Bytes, HandlerError>;

    /// Called once the read path accepted `message` for dispatch.
    fn on_read(&self, _message: &Message) {}

    /// Called after `reply` was written, with the write outcome.
    fn on_write(&self, _reply: &Message, _outcome: Result<(), &io::Error>) {}
}

/// Mapping from command ID to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u16, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("command_ids", &ids)
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Registry preloaded with the baseline commands: registration,
    /// authentication, heartbeat, location report, batch location report and
    /// the terminal general reply.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with(RegistrationHandler::new())
            .with(GeneralReplyHandler::authentication())
            .with(GeneralReplyHandler::heartbeat())
            .with(GeneralReplyHandler::location_report())
            .with(GeneralReplyHandler::batch_location_report())
            .with(TerminalReplyHandler)
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.insert(handler);
        self
    }

    /// Register `handler` under its own command ID, returning any handler it
    /// replaced.
    pub fn insert(&mut self, handler: impl Handler) -> Option<Arc<dyn Handler>> {
        self.insert_shared(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn insert_shared(&mut self, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(handler.command_id(), handler)
    }

    /// Overlay `overrides` on this registry; entries in `overrides` win.
    #[must_use]
    pub fn merge(mut self, overrides: HandlerRegistry) -> Self {
        self.handlers.extend(overrides.handlers);
        self
    }

    /// Look up the handler for `command_id`.
    #[must_use]
    pub fn get(&self, command_id: u16) -> Option<&Arc<dyn Handler>> { self.handlers.get(&command_id) }

    /// Whether a handler is registered for `command_id`.
    #[must_use]
    pub fn contains(&self, command_id: u16) -> bool { self.handlers.contains_key(&command_id) }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize { self.handlers.len() }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }
}

pub(crate) fn put_u16(dst: &mut BytesMut, value: u16) { dst.put_slice(&write_network_u16(value)); }
