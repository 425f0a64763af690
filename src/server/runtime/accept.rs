//! Accept loop shared by the TCP server and its tests.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::server::{
    HandlerFactory,
    connection::{ConnectionContext, spawn_connection_task},
};

/// Source of incoming device streams.
///
/// Dropping a pending `accept()` future must not lose an accepted stream.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self) -> io::Result<(Self::Stream, Option<SocketAddr>)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: error={e}, peer_addr={peer}");
        }
        Ok((stream, Some(peer)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Everything the accept loop needs besides the listener and factory.
#[derive(Clone)]
pub(in crate::server) struct AcceptLoopOptions {
    pub context: ConnectionContext,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `shutdown` is cancelled.
///
/// Each accepted stream is served on a task tracked by `options.tracker`.
/// Accept errors are logged and retried after an exponential back-off; they
/// never end the loop.
pub(in crate::server) async fn accept_loop<F, L>(
    listener: Arc<L>,
    factory: F,
    options: AcceptLoopOptions,
) where
    F: HandlerFactory,
    L: AcceptListener + 'static,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) = accept_once(&listener, &factory, &options, &backoff, delay).await {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_once<F, L>(
    listener: &Arc<L>,
    factory: &F,
    options: &AcceptLoopOptions,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    F: HandlerFactory,
    L: AcceptListener + 'static,
{
    select! {
        biased;

        () = options.shutdown.cancelled() => None,
        res = listener.accept() => match res {
            Ok((stream, peer_addr)) => {
                spawn_connection_task(
                    stream,
                    peer_addr,
                    factory.clone(),
                    options.context.clone(),
                    &options.tracker,
                );
                Some(backoff.initial_delay)
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e}, local_addr={local_addr:?}, retry_in={delay:?}");
                select! {
                    biased;

                    () = options.shutdown.cancelled() => None,
                    () = sleep(delay) => Some(backoff.next_delay(delay)),
                }
            }
        },
    }
}
