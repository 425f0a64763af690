//! Write path: drains active commands and queued replies onto the socket.

use std::{io, sync::Arc};

use futures::SinkExt;
use log::{debug, warn};
use tokio::{
    io::AsyncWrite,
    select,
    sync::{mpsc, watch},
};
use tokio_util::codec::FramedWrite;

use super::{ConnectionId, pending::PendingReplies, stats::Counters};
use crate::{
    codec::{FrameEncoder, Header, MAX_BODY_LEN},
    handler::Handler,
    message::Message,
    metrics::{self, Direction},
    session::{ActiveCommandError, PendingCommand},
};

/// An inbound message waiting for its handler's reply.
pub(super) struct QueuedReply {
    pub(super) handler: Arc<dyn Handler>,
    pub(super) message: Message,
}

pub(super) struct WritePath<W> {
    pub(super) id: ConnectionId,
    pub(super) sink: FramedWrite<W, FrameEncoder>,
    pub(super) replies: mpsc::Receiver<QueuedReply>,
    pub(super) commands: mpsc::Receiver<PendingCommand>,
    pub(super) latest_header: watch::Receiver<Option<Header>>,
    pub(super) pending: Arc<PendingReplies>,
    pub(super) counters: Arc<Counters>,
    pub(super) next_serial: u16,
}

impl<W> WritePath<W>
where
    W: AsyncWrite + Unpin,
{
    /// Write until both queues close or a write fails.
    ///
    /// Active commands are taken before queued replies.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub(super) async fn run(mut self) -> io::Result<()> {
        loop {
            select! {
                biased;

                Some(command) = self.commands.recv() => self.write_command(command).await?,
                Some(reply) = self.replies.recv() => self.write_reply(reply).await?,
                else => return Ok(()),
            }
        }
    }

    pub(super) fn take_serial(&mut self) -> u16 {
        let serial = self.next_serial;
        self.next_serial = serial.wrapping_add(1);
        serial
    }

    async fn write_reply(&mut self, queued: QueuedReply) -> io::Result<()> {
        let QueuedReply { handler, message } = queued;
        if !handler.wants_reply() {
            return Ok(());
        }
        let body = match handler.build_reply(&message) {
            Ok(body) if body.len() <= MAX_BODY_LEN => body,
            Ok(body) => {
                warn!(
                    "reply body too long: id={}, command_id={:#06x}, len={}",
                    self.id,
                    message.command_id(),
                    body.len()
                );
                metrics::inc_errors();
                return Ok(());
            }
            Err(e) => {
                warn!("reply not built: id={}, error={e}", self.id);
                metrics::inc_errors();
                return Ok(());
            }
        };
        let serial = self.take_serial();
        let header = message.header.into_reply(handler.reply_id(), serial);
        let reply = Message::new(header, body);

        let outcome = self.sink.send(reply.clone()).await;
        handler.on_write(&reply, outcome.as_ref().copied());
        outcome?;
        Counters::bump(&self.counters.replies_written);
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }

    async fn write_command(&mut self, command: PendingCommand) -> io::Result<()> {
        if command.responder.is_closed() {
            debug!("skipping abandoned command: id={}", self.id);
            return Ok(());
        }
        if self.pending.has_live() {
            command.resolve(Err(ActiveCommandError::InFlight));
            return Ok(());
        }
        if command.request.body.len() > MAX_BODY_LEN {
            let len = command.request.body.len();
            command.resolve(Err(ActiveCommandError::Transport(format!(
                "command body of {len} bytes exceeds {MAX_BODY_LEN}"
            ))));
            return Ok(());
        }
        let template = self.latest_header.borrow().clone();
        let Some(template) = template else {
            command.resolve(Err(ActiveCommandError::Transport(
                "no header received from device yet".into(),
            )));
            return Ok(());
        };

        let PendingCommand { request, responder } = command;
        let serial = self.take_serial();
        let header = template.into_reply(request.command_id, serial);
        self.pending.register(serial, &request, responder);
        debug!(
            "writing active command: id={}, command_id={:#06x}, serial={serial}, pending={}",
            self.id,
            request.command_id,
            self.pending.len()
        );

        if let Err(e) = self.sink.send(Message::new(header, request.body)).await {
            self.pending
                .fail(serial, ActiveCommandError::Transport(e.to_string()));
            return Err(e);
        }
        Counters::bump(&self.counters.commands_written);
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }
}
