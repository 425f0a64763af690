//! Per-connection engine.
//!
//! A [`Connection`] owns one device socket. Its read path runs on the task
//! that calls [`Connection::run`]: it feeds socket bytes through a
//! [`StreamReassembler`], hands replies to pending active commands, keeps the
//! session directory up to date and dispatches everything else to the
//! registered [`Handler`](crate::handler::Handler). Handler replies travel
//! over a bounded queue to a write task that also carries platform-initiated
//! commands. A full reply queue drops the reply rather than stalling reads.
//! When the peer closes its side, replies already queued are still written;
//! stopping the connection discards them.

mod id;
mod pending;
mod reader;
mod state;
mod stats;
mod writer;

use std::{io, net::SocketAddr, sync::Arc};

pub use id::ConnectionId;
use log::{error, info, warn};
use reader::ReadPath;
pub use state::ConnectionState;
use state::StateCell;
pub use stats::{ConnectionStats, running_connections};
use stats::{Counters, RunningGuard};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::{mpsc, watch},
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};
use writer::WritePath;

use crate::{
    codec::{FrameEncoder, MAX_BODY_LEN},
    handler::HandlerRegistry,
    hooks::ConnectionObserver,
    panic::panic_message,
    reassembly::StreamReassembler,
    session::SessionDirectory,
};

/// Tunables for a single connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Size of the socket read buffer.
    pub read_buffer_size: usize,
    /// Replies that may wait for the writer before new ones are dropped.
    pub reply_queue_capacity: usize,
    /// Active commands that may wait for the writer.
    pub active_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: MAX_BODY_LEN,
            reply_queue_capacity: 64,
            active_queue_capacity: 4,
        }
    }
}

/// Errors that end a connection abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    /// The write task panicked.
    #[error("write task panicked: {0}")]
    WriterPanicked(String),
}

/// Cloneable handle used to stop a running connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    state: Arc<StateCell>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Identifier of the connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state.get() }

    /// Stop the connection. Returns `true` for the call that performed the
    /// transition; later calls do nothing.
    pub fn stop(&self) -> bool {
        let stopped = self.state.stop();
        self.shutdown.cancel();
        stopped
    }
}

/// A device connection over any async byte stream.
///
/// ```no_run
/// use jt808::{connection::Connection, handler::HandlerRegistry, session::SessionDirectory};
/// use tokio::net::TcpStream;
///
/// # async fn serve(stream: TcpStream) {
/// let connection = Connection::new(stream, HandlerRegistry::with_defaults())
///     .with_directory(SessionDirectory::spawn());
/// let handle = connection.handle();
/// let stats = connection.run().await;
/// # drop((handle, stats));
/// # }
/// ```
pub struct Connection<S> {
    stream: S,
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    handlers: Arc<HandlerRegistry>,
    directory: Option<SessionDirectory>,
    observer: Arc<dyn ConnectionObserver>,
    config: ConnectionConfig,
    state: Arc<StateCell>,
    shutdown: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap `stream`, dispatching to `handlers`.
    #[must_use]
    pub fn new(stream: S, handlers: HandlerRegistry) -> Self {
        Self::with_shared_handlers(stream, Arc::new(handlers))
    }

    /// Wrap `stream` with a registry shared between connections.
    #[must_use]
    pub fn with_shared_handlers(stream: S, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            stream,
            id: ConnectionId::next(),
            peer_addr: None,
            handlers,
            directory: None,
            observer: Arc::new(()),
            config: ConnectionConfig::default(),
            state: Arc::new(StateCell::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register with `directory` once the device identifies itself.
    #[must_use]
    pub fn with_directory(mut self, directory: SessionDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Report notable events to `observer`.
    #[must_use]
    pub fn with_observer(self, observer: impl ConnectionObserver) -> Self {
        self.with_shared_observer(Arc::new(observer))
    }

    /// Report notable events to an already shared observer.
    #[must_use]
    pub fn with_shared_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the default [`ConnectionConfig`].
    #[must_use]
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Record the remote address for logging.
    #[must_use]
    pub fn with_peer_addr(mut self, peer_addr: Option<SocketAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }

    /// Stop the connection when `token` is cancelled.
    ///
    /// Call before [`handle`](Self::handle); handles taken earlier keep the
    /// previous token.
    #[must_use]
    pub fn with_shutdown(mut self, token: &CancellationToken) -> Self {
        self.shutdown = token.child_token();
        self
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state.get() }

    /// Handle for stopping the connection from another task.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Serve the connection until the peer closes it, an I/O error occurs or
    /// the connection is stopped.
    ///
    /// A connection stopped before `run` returns immediately with empty
    /// statistics.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] when the socket fails; the connection is
    /// stopped and has left the directory by then.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run(self) -> Result<ConnectionStats, ConnectionError> {
        let Self {
            stream,
            id,
            peer_addr,
            handlers,
            directory,
            observer,
            config,
            state,
            shutdown,
        } = self;
        if !state.start() {
            info!("connection stopped before start: id={id}, peer={peer_addr:?}");
            return Ok(ConnectionStats::default());
        }
        let _running = RunningGuard::acquire();
        info!(
            "connection opened: jt808_running_connections={}, id={id}, peer={peer_addr:?}",
            running_connections()
        );

        let (read_half, write_half) = tokio::io::split(stream);
        let (reply_tx, reply_rx) = mpsc::channel(config.reply_queue_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(config.active_queue_capacity.max(1));
        let (header_tx, header_rx) = watch::channel(None);
        let pending = Arc::default();
        let counters = Arc::new(Counters::default());

        let writer = WritePath {
            id,
            sink: FramedWrite::new(write_half, FrameEncoder),
            replies: reply_rx,
            commands: command_rx,
            latest_header: header_rx,
            pending: Arc::clone(&pending),
            counters: Arc::clone(&counters),
            next_serial: 0,
        };
        let writer_shutdown = shutdown.clone();
        let writer = tokio::spawn(async move {
            let outcome = select! {
                biased;

                () = writer_shutdown.cancelled() => Ok(()),
                outcome = writer.run() => outcome,
            };
            writer_shutdown.cancel();
            outcome
        });

        let mut reader = ReadPath {
            id,
            handlers,
            directory,
            observer: Arc::clone(&observer),
            reassembler: StreamReassembler::new(),
            session: None,
            refused: None,
            replies: reply_tx,
            delivery: command_tx,
            latest_header: header_tx,
            pending,
            counters: Arc::clone(&counters),
        };
        let read_outcome = reader
            .run(read_half, config.read_buffer_size, &shutdown)
            .await;

        state.stop();
        if read_outcome.is_err() {
            shutdown.cancel();
        }
        reader.leave().await;
        // After a clean close the writer flushes what is queued and exits once
        // both queues have no senders left.
        drop(reader);

        let write_outcome = match writer.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Write(e)),
            Err(e) if e.is_panic() => {
                let panic = panic_message(&*e.into_panic());
                error!("connection writer panicked: id={id}, panic={panic}");
                Err(ConnectionError::WriterPanicked(panic))
            }
            Err(_) => Ok(()),
        };

        let stats = counters.snapshot();
        observer.on_closed(id, &stats);
        let outcome = read_outcome.and(write_outcome);
        match &outcome {
            Ok(()) => info!("connection closed: id={id}, peer={peer_addr:?}, stats={stats:?}"),
            Err(e) => {
                crate::metrics::inc_errors();
                warn!("connection failed: id={id}, peer={peer_addr:?}, error={e}, stats={stats:?}");
            }
        }
        outcome.map(|()| stats)
    }
}

#[cfg(test)]
mod tests;
