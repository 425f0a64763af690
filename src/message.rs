//! Decoded protocol messages.

use bytes::Bytes;

use crate::codec::Header;

/// One logical protocol message: a header, its opaque body and the wire
/// bytes it was decoded from.
///
/// A message is owned by the connection that parsed it until it is handed to
/// a [`Handler`](crate::handler::Handler) and then to the writer path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Body bytes following the header.
    pub body: Bytes,
    /// Escaped wire bytes, kept for diagnostics and forwarding. For a
    /// reassembled sub-packaged message this is every fragment's frame in
    /// index order.
    pub raw: Bytes,
}

impl Message {
    /// Construct a message with no recorded wire bytes.
    #[must_use]
    pub fn new(header: Header, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
            raw: Bytes::new(),
        }
    }

    /// Command identifier from the header.
    #[must_use]
    pub fn command_id(&self) -> u16 { self.header.command_id }

    /// Serial number from the header.
    #[must_use]
    pub fn serial(&self) -> u16 { self.header.serial }

    /// Device phone number from the header.
    #[must_use]
    pub fn phone(&self) -> &str { &self.header.phone }
}
