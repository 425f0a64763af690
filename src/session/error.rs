//! Errors raised by session directory and active-command operations.

use std::time::Duration;

use thiserror::Error;

use super::SessionKey;

/// Errors returned by [`SessionDirectory`](super::SessionDirectory)
/// bookkeeping operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another live connection already holds this key.
    #[error("session key {0} already joined")]
    KeyExists(SessionKey),
    /// The key extractor found no key in the message.
    #[error("message carries no session key")]
    KeyUnavailable,
    /// The directory task is no longer running.
    #[error("session directory closed")]
    DirectoryClosed,
}

/// Failures of a platform-initiated command.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ActiveCommandError {
    /// No session is registered under the requested key.
    #[error("no session for key {0}")]
    NotExist(SessionKey),
    /// The device did not answer within the request's timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// The command could not be delivered or its reply was lost.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Another command to the same device is still awaiting its reply.
    #[error("another command is in flight for this device")]
    InFlight,
    /// The directory task is no longer running.
    #[error("session directory closed")]
    Closed,
}
