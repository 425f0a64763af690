//! Read path: socket bytes to dispatched messages.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
};
use tokio_util::sync::CancellationToken;

use super::{
    ConnectionError,
    ConnectionId,
    pending::PendingReplies,
    stats::Counters,
    writer::QueuedReply,
};
use crate::{
    codec::Header,
    handler::HandlerRegistry,
    hooks::ConnectionObserver,
    message::Message,
    metrics::{self, Direction},
    reassembly::StreamReassembler,
    session::{SessionDelivery, SessionDirectory, SessionError, SessionKey},
};

pub(super) struct ReadPath {
    pub(super) id: ConnectionId,
    pub(super) handlers: Arc<HandlerRegistry>,
    pub(super) directory: Option<SessionDirectory>,
    pub(super) observer: Arc<dyn ConnectionObserver>,
    pub(super) reassembler: StreamReassembler,
    pub(super) session: Option<SessionKey>,
    /// Key last refused because another connection holds it.
    pub(super) refused: Option<SessionKey>,
    pub(super) replies: mpsc::Sender<QueuedReply>,
    pub(super) delivery: SessionDelivery,
    pub(super) latest_header: watch::Sender<Option<Header>>,
    pub(super) pending: Arc<PendingReplies>,
    pub(super) counters: Arc<Counters>,
}

impl ReadPath {
    /// Read until EOF, a read error or `shutdown`.
    ///
    /// EOF and shutdown end the loop cleanly.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub(super) async fn run<R>(
        &mut self,
        mut source: R,
        buffer_size: usize,
        shutdown: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0_u8; buffer_size.max(1)];
        loop {
            let read = select! {
                biased;

                () = shutdown.cancelled() => return Ok(()),
                read = source.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    debug!("connection closed by peer: id={}", self.id);
                    return Ok(());
                }
                Ok(n) => self.on_bytes(&buf[..n]).await,
                Err(e) => return Err(ConnectionError::Read(e)),
            }
        }
    }

    async fn on_bytes(&mut self, bytes: &[u8]) {
        let feed = self.reassembler.feed(bytes);
        for error in &feed.errors {
            Counters::bump(&self.counters.frame_errors);
            metrics::inc_errors();
            self.observer.on_frame_error(self.id, error);
        }
        for message in feed.messages {
            self.on_message(message).await;
        }
    }

    async fn on_message(&mut self, message: Message) {
        Counters::bump(&self.counters.frames_read);
        metrics::inc_frames(Direction::Inbound);

        let Some(message) = self.pending.try_resolve(message) else {
            return;
        };
        self.track_session(&message).await;

        let Some(handler) = self.handlers.get(message.command_id()).cloned() else {
            debug!(
                "unsupported command: id={}, command_id={:#06x}",
                self.id,
                message.command_id()
            );
            self.observer.on_unsupported(self.id, &message);
            return;
        };
        if let Err(e) = handler.decode(&message) {
            warn!("dropping undecodable message: id={}, error={e}", self.id);
            metrics::inc_errors();
            return;
        }
        handler.on_read(&message);

        match self.replies.try_send(QueuedReply { handler, message }) {
            Ok(()) => {}
            Err(TrySendError::Full(QueuedReply { message, .. })) => {
                warn!(
                    "reply queue full, dropping reply: id={}, command_id={:#06x}, serial={}",
                    self.id,
                    message.command_id(),
                    message.serial()
                );
                Counters::bump(&self.counters.replies_dropped);
                metrics::inc_replies_dropped();
                self.observer.on_reply_dropped(self.id, &message);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("reply queue closed: id={}", self.id);
            }
        }
    }

    /// Publish the newest header and keep the directory entry current,
    /// joining on the first message that yields a key.
    ///
    /// A refused key is not retried; a join is attempted again only when
    /// the device presents a different key.
    async fn track_session(&mut self, message: &Message) {
        self.latest_header.send_replace(Some(message.header.clone()));
        let Some(directory) = &self.directory else {
            return;
        };
        if let Some(key) = &self.session {
            if let Err(e) = directory.refresh(key, message.header.clone()).await {
                debug!("session refresh failed: id={}, error={e}", self.id);
            }
            return;
        }
        if self.refused.is_some() && self.refused == directory.key_for(message) {
            return;
        }
        match directory.join(message, self.delivery.clone()).await {
            Ok(key) => {
                info!("session joined: id={}, key={key}", self.id);
                self.observer.on_session_joined(self.id, &key);
                self.refused = None;
                self.session = Some(key);
            }
            Err(SessionError::KeyExists(key)) => {
                warn!("session key already held by another connection: id={}, key={key}", self.id);
                self.observer.on_session_refused(self.id, &key);
                self.refused = Some(key);
            }
            Err(e) => debug!("session join deferred: id={}, error={e}", self.id),
        }
    }

    /// Leave the directory if this connection joined it.
    pub(super) async fn leave(&mut self) {
        let (Some(directory), Some(key)) = (&self.directory, self.session.take()) else {
            return;
        };
        if let Err(e) = directory.leave_owned(&key, self.delivery.clone()).await {
            debug!("session leave failed: id={}, key={key}, error={e}", self.id);
        }
    }
}
