//! Merges sub-packaged fragments into complete messages.
//!
//! Fragments of one logical message share a command ID and carry a
//! `total`/`index` pair. An assembly opens when index 1 arrives, fills slots
//! as later indices arrive in any order, and is emitted once every slot is
//! filled. A fresh index 1 for the same command ID replaces an unfinished
//! assembly; retransmission is left to higher layers.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::{
    codec::{FrameError, Header, MAX_BODY_LEN, SubPackage},
    message::Message,
};

#[derive(Debug)]
struct Fragment {
    body: Bytes,
    raw: Bytes,
}

#[derive(Debug)]
struct PartialMessage {
    header: Header,
    slots: Vec<Option<Fragment>>,
    filled: usize,
}

impl PartialMessage {
    fn start(total: u16, first: Message) -> Self {
        let mut partial = Self {
            header: first.header.clone(),
            slots: std::iter::repeat_with(|| None).take(usize::from(total)).collect(),
            filled: 0,
        };
        partial.insert(1, first);
        partial
    }

    fn total(&self) -> usize { self.slots.len() }

    fn insert(&mut self, index: u16, message: Message) {
        let Some(slot) = self.slots.get_mut(usize::from(index) - 1) else {
            return;
        };
        if slot.is_none() {
            self.filled += 1;
        }
        *slot = Some(Fragment {
            body: message.body,
            raw: message.raw,
        });
    }

    fn is_complete(&self) -> bool { self.filled == self.total() }

    fn into_message(self) -> Message {
        let mut body = BytesMut::new();
        let mut raw = BytesMut::new();
        for fragment in self.slots.into_iter().flatten() {
            body.extend_from_slice(&fragment.body);
            raw.extend_from_slice(&fragment.raw);
        }
        let mut header = self.header;
        header.sub_package = None;
        header.properties.sub_package = false;
        // The length field is 10 bits wide; larger merged bodies saturate it.
        header.properties.body_len =
            u16::try_from(body.len().min(MAX_BODY_LEN)).unwrap_or(u16::MAX);
        Message {
            header,
            body: body.freeze(),
            raw: raw.freeze(),
        }
    }
}

/// Per-connection table of open sub-package assemblies keyed by command ID.
#[derive(Debug, Default)]
pub struct SubPackageAssembler {
    open: HashMap<u16, PartialMessage>,
}

impl SubPackageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of assemblies still waiting for fragments.
    #[must_use]
    pub fn open_sets(&self) -> usize { self.open.len() }

    /// Feed one decoded frame.
    ///
    /// Unfragmented messages are returned unchanged. Fragments return
    /// `Ok(None)` until the final missing slot is filled, at which point the
    /// merged message is returned with the first fragment's header and the
    /// bodies concatenated in index order. The merged header's body length
    /// describes the concatenated body, capped at [`MAX_BODY_LEN`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidSubPackage`] for a zero total, an index
    /// outside `1..=total`, or a total that disagrees with the open assembly.
    pub fn push(&mut self, message: Message) -> Result<Option<Message>, FrameError> {
        let Some(SubPackage { total, index }) = message.header.sub_package else {
            return Ok(Some(message));
        };
        if total == 0 || index == 0 || index > total {
            return Err(FrameError::InvalidSubPackage { total, index });
        }
        let command_id = message.header.command_id;

        let partial = if index == 1 {
            if let Some(previous) = self.open.remove(&command_id) {
                warn!(
                    command_id,
                    received = previous.filled,
                    total = previous.total(),
                    "discarding incomplete sub-package set superseded by a new first fragment"
                );
            }
            self.open
                .entry(command_id)
                .or_insert(PartialMessage::start(total, message))
        } else {
            let Some(partial) = self.open.get_mut(&command_id) else {
                debug!(command_id, index, total, "dropping fragment without an open sub-package set");
                return Ok(None);
            };
            if partial.total() != usize::from(total) {
                return Err(FrameError::InvalidSubPackage { total, index });
            }
            partial.insert(index, message);
            partial
        };

        if !partial.is_complete() {
            return Ok(None);
        }
        Ok(self.open.remove(&command_id).map(PartialMessage::into_message))
    }
}
