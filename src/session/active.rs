//! Platform-initiated ("active") commands.
//!
//! An [`ActiveRequest`] travels from a caller through the directory to the
//! owning connection's writer as a [`PendingCommand`]. The writer stamps a
//! platform serial, writes the frame and parks the responder until the read
//! path sees the matching reply. The caller bounds the whole exchange with
//! the request's timeout.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::{ActiveCommandError, SessionKey};
use crate::message::Message;

/// Timeout applied when a request does not set its own.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome delivered to the caller of an active command.
pub type CommandResult = Result<Message, ActiveCommandError>;

/// Sending half resolved exactly once with a [`CommandResult`].
pub type Responder = oneshot::Sender<CommandResult>;

/// A command the platform sends to a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveRequest {
    /// Directory key of the target device.
    pub key: SessionKey,
    /// Command ID written to the device.
    pub command_id: u16,
    /// Command body.
    pub body: Bytes,
    /// How long the caller waits for the reply.
    pub timeout: Duration,
    /// Command-specific reply ID accepted in addition to the terminal
    /// general reply.
    pub expected_reply: Option<u16>,
}

impl ActiveRequest {
    /// Create a request with [`DEFAULT_COMMAND_TIMEOUT`].
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use jt808::session::ActiveRequest;
    ///
    /// let request = ActiveRequest::new("13800138000", 0x8104, Vec::new())
    ///     .with_timeout(Duration::from_secs(3))
    ///     .expecting_reply(0x0104);
    /// assert_eq!(request.expected_reply, Some(0x0104));
    /// ```
    #[must_use]
    pub fn new(key: impl Into<SessionKey>, command_id: u16, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            command_id,
            body: body.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            expected_reply: None,
        }
    }

    /// Override the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept `reply_id` as the answer besides the terminal general reply.
    #[must_use]
    pub fn expecting_reply(mut self, reply_id: u16) -> Self {
        self.expected_reply = Some(reply_id);
        self
    }
}

/// A routed request paired with the channel its outcome is sent on.
#[derive(Debug)]
pub struct PendingCommand {
    /// The request being delivered.
    pub request: ActiveRequest,
    /// Resolved with the device reply or a failure.
    pub responder: Responder,
}

impl PendingCommand {
    /// Resolve the command with `outcome`. A caller that already gave up is
    /// ignored.
    pub fn resolve(self, outcome: CommandResult) { let _ = self.responder.send(outcome); }
}
