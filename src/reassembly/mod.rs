//! Per-connection stream reassembly.
//!
//! [`StreamReassembler`] turns a continuously arriving byte stream into
//! complete [`Message`]s. Frames may be split across reads, several frames
//! may share one read, and sub-packaged messages are merged before they are
//! yielded. Decode failures never abort a chunk: the offending frame is
//! dropped, its error is reported alongside the messages that did decode,
//! and scanning continues.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

mod sub_package;

pub use sub_package::SubPackageAssembler;

use crate::{
    codec::{FrameError, MAX_FRAME_LEN, SENTINEL, decode_frame},
    message::Message,
};

/// Outcome of feeding one chunk of bytes.
#[derive(Debug, Default)]
pub struct Feed {
    /// Messages completed by this chunk, in arrival order.
    pub messages: Vec<Message>,
    /// Frames discarded while processing this chunk.
    pub errors: Vec<FrameError>,
}

/// Stateful frame extractor owned by a single connection's read path.
#[derive(Debug)]
pub struct StreamReassembler {
    buffer: BytesMut,
    max_buffered: usize,
    sub_packages: SubPackageAssembler,
}

impl Default for StreamReassembler {
    fn default() -> Self { Self::new() }
}

impl StreamReassembler {
    /// Create a reassembler that buffers at most one maximum-size frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered: MAX_FRAME_LEN,
            sub_packages: SubPackageAssembler::new(),
        }
    }

    /// Bytes held back waiting for a closing sentinel.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.buffer.len() }

    /// Sub-package sets still waiting for fragments.
    #[must_use]
    pub fn open_sub_packages(&self) -> usize { self.sub_packages.open_sets() }

    /// Consume a chunk read from the socket.
    ///
    /// When nothing is buffered and `bytes` is exactly one frame it is
    /// decoded in place. Otherwise the chunk is appended to the buffer and
    /// every complete `0x7E … 0x7E` span is decoded in turn.
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        let mut feed = Feed::default();
        if self.buffer.is_empty() && is_single_frame(bytes) {
            self.accept(decode_frame(bytes), &mut feed);
            return feed;
        }

        self.buffer.extend_from_slice(bytes);
        self.drain_frames(&mut feed);
        if self.buffer.len() > self.max_buffered {
            let err = FrameError::Oversized {
                size: self.buffer.len(),
                max: self.max_buffered,
            };
            warn!(error = %err, "clearing frame buffer");
            self.buffer.clear();
            feed.errors.push(err);
        }
        feed
    }

    fn drain_frames(&mut self, feed: &mut Feed) {
        loop {
            let Some(start) = self.buffer.iter().position(|b| *b == SENTINEL) else {
                if !self.buffer.is_empty() {
                    trace!(discarded = self.buffer.len(), "discarding bytes outside a frame");
                    self.buffer.clear();
                }
                return;
            };
            if start > 0 {
                trace!(discarded = start, "discarding bytes before frame start");
                self.buffer.advance(start);
            }
            let Some(end) = self.buffer[1..]
                .iter()
                .position(|b| *b == SENTINEL)
                .map(|offset| offset + 1)
            else {
                return;
            };
            if end == 1 {
                // Back-to-back sentinels: the first closed a frame we never
                // saw the start of.
                self.buffer.advance(1);
                continue;
            }

            match decode_frame(&self.buffer[..=end]) {
                Ok(message) => {
                    self.buffer.advance(end + 1);
                    self.accept(Ok(message), feed);
                }
                Err(err) => {
                    // Keep the closing sentinel: it may open the next frame.
                    self.buffer.advance(end);
                    self.accept(Err(err), feed);
                }
            }
        }
    }

    fn accept(&mut self, decoded: Result<Message, FrameError>, feed: &mut Feed) {
        match decoded.and_then(|message| self.sub_packages.push(message)) {
            Ok(Some(message)) => feed.messages.push(message),
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "discarding frame");
                feed.errors.push(err);
            }
        }
    }
}

/// Whether `bytes` is exactly one non-empty `0x7E … 0x7E` span.
fn is_single_frame(bytes: &[u8]) -> bool {
    bytes.len() > 2
        && bytes.first() == Some(&SENTINEL)
        && bytes.last() == Some(&SENTINEL)
        && bytes.iter().filter(|b| **b == SENTINEL).count() == 2
}

#[cfg(test)]
mod tests;
