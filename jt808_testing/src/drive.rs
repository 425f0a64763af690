//! In-memory connection driving helpers.

use std::{io, panic::AssertUnwindSafe};

use futures::FutureExt;
use jt808::{
    connection::Connection,
    handler::HandlerRegistry,
    message::Message,
    panic::panic_message,
    reassembly::StreamReassembler,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

/// Duplex buffer size used by [`drive_connection`].
pub const DEFAULT_CAPACITY: usize = 4096;

/// Decode every complete message in `bytes`.
///
/// # Panics
///
/// Panics if `bytes` contain a corrupt frame.
#[must_use]
pub fn decode_all(bytes: &[u8]) -> Vec<Message> {
    let feed = StreamReassembler::new().feed(bytes);
    assert!(feed.errors.is_empty(), "corrupt platform output: {:?}", feed.errors);
    feed.messages
}

/// Run a connection serving `handlers`, write each of `frames` to it, close
/// the device side and return the decoded platform output.
///
/// # Errors
///
/// Returns an error if writing or reading the duplex stream fails, if the
/// connection ends with an error, or if it panics (the message then starts
/// with `"connection task failed"`).
pub async fn drive_connection<I, B>(handlers: HandlerRegistry, frames: I) -> io::Result<Vec<Message>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    drive_connection_with_capacity(handlers, frames, DEFAULT_CAPACITY).await
}

/// [`drive_connection`] with an explicit duplex buffer size.
///
/// # Errors
///
/// See [`drive_connection`].
pub async fn drive_connection_with_capacity<I, B>(
    handlers: HandlerRegistry,
    frames: I,
    capacity: usize,
) -> io::Result<Vec<Message>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let (mut client, server) = duplex(capacity);
    let connection = Connection::new(server, handlers);

    let server_fut = async {
        match AssertUnwindSafe(connection.run()).catch_unwind().await {
            Ok(Ok(_stats)) => Ok(()),
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(panic) => Err(io::Error::other(format!(
                "connection task failed: {}",
                panic_message(panic.as_ref())
            ))),
        }
    };

    let frames: Vec<B> = frames.into_iter().collect();
    let client_fut = async {
        for frame in &frames {
            client.write_all(frame.as_ref()).await?;
        }
        client.shutdown().await?;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await?;
        io::Result::Ok(buf)
    };

    let ((), buf) = tokio::try_join!(server_fut, client_fut)?;
    Ok(decode_all(&buf))
}
