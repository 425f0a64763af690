//! Active commands awaiting the device's reply.
//!
//! The writer registers an entry under the platform serial it stamped on the
//! command; the reader checks each inbound message against the table before
//! normal dispatch. Both paths share the table, hence the concurrent map.

use dashmap::DashMap;
use tracing::debug;

use crate::{
    byte_order::read_u16_at,
    handler::command,
    message::Message,
    session::{ActiveCommandError, ActiveRequest, Responder},
};

#[derive(Debug)]
struct PendingReply {
    command_id: u16,
    expected_reply: Option<u16>,
    responder: Responder,
}

impl PendingReply {
    /// A reply acknowledges the serial in its first two body bytes. A
    /// terminal general reply must also name the command it answers.
    fn matches(&self, message: &Message) -> bool {
        let id = message.command_id();
        if id == command::TERMINAL_REPLY {
            return read_u16_at(&message.body, 2) == Some(self.command_id);
        }
        self.expected_reply == Some(id)
    }
}

#[derive(Debug, Default)]
pub(super) struct PendingReplies {
    entries: DashMap<u16, PendingReply>,
}

impl PendingReplies {
    /// Drop entries whose caller gave up and report whether any remain.
    pub(super) fn has_live(&self) -> bool {
        self.entries.retain(|_, pending| !pending.responder.is_closed());
        !self.entries.is_empty()
    }

    pub(super) fn register(&self, serial: u16, request: &ActiveRequest, responder: Responder) {
        self.entries.insert(
            serial,
            PendingReply {
                command_id: request.command_id,
                expected_reply: request.expected_reply,
                responder,
            },
        );
    }

    /// Resolve the entry for `serial` with `error`.
    pub(super) fn fail(&self, serial: u16, error: ActiveCommandError) {
        if let Some((_, pending)) = self.entries.remove(&serial) {
            let _ = pending.responder.send(Err(error));
        }
    }

    /// Deliver `message` to the command it answers.
    ///
    /// Returns the message back when it answers no pending command.
    pub(super) fn try_resolve(&self, message: Message) -> Option<Message> {
        let Some(serial) = read_u16_at(&message.body, 0) else {
            return Some(message);
        };
        let matched = self
            .entries
            .remove_if(&serial, |_, pending| pending.matches(&message));
        let Some((_, pending)) = matched else {
            return Some(message);
        };
        if pending.responder.send(Ok(message)).is_err() {
            debug!(serial, "reply arrived after the caller gave up");
        }
        None
    }

    pub(super) fn len(&self) -> usize { self.entries.len() }
}
