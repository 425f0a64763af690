//! Observation hooks invoked by the connection engine.
//!
//! [`ConnectionObserver`] lets applications see events the engine otherwise
//! only logs: messages nobody handles, frames that fail to decode and
//! replies dropped because the writer fell behind. Every method has an empty
//! default, and `()` is the no-op observer used when none is configured.

use crate::{
    codec::FrameError,
    connection::{ConnectionId, ConnectionStats},
    message::Message,
    session::SessionKey,
};

/// Callbacks describing notable events on a connection.
///
/// Observers are shared by every connection of a server and called from the
/// connection's read path, so implementations should return quickly.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use jt808::{connection::ConnectionId, hooks::ConnectionObserver, message::Message};
///
/// #[derive(Default)]
/// struct CountUnsupported(AtomicUsize);
///
/// impl ConnectionObserver for CountUnsupported {
///     fn on_unsupported(&self, _id: ConnectionId, _message: &Message) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait ConnectionObserver: Send + Sync + 'static {
    /// A message arrived whose command ID has no registered handler.
    fn on_unsupported(&self, _id: ConnectionId, _message: &Message) {}

    /// A frame was discarded because it failed to decode.
    fn on_frame_error(&self, _id: ConnectionId, _error: &FrameError) {}

    /// A reply was dropped because the reply queue was full.
    fn on_reply_dropped(&self, _id: ConnectionId, _message: &Message) {}

    /// The connection registered in the session directory.
    fn on_session_joined(&self, _id: ConnectionId, _key: &SessionKey) {}

    /// The connection's key is held by another live connection. Reported
    /// once per refused key.
    fn on_session_refused(&self, _id: ConnectionId, _key: &SessionKey) {}

    /// The connection stopped.
    fn on_closed(&self, _id: ConnectionId, _stats: &ConnectionStats) {}
}

impl ConnectionObserver for () {}
