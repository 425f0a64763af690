//! Per-connection task spawning for [`Server`](super::Server).

use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use log::error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::HandlerFactory;
use crate::{
    connection::{Connection, ConnectionConfig},
    handler::HandlerRegistry,
    hooks::ConnectionObserver,
    panic::panic_message,
    session::SessionDirectory,
};

/// State shared by every connection a server accepts.
#[derive(Clone)]
pub(in crate::server) struct ConnectionContext {
    pub config: ConnectionConfig,
    pub observer: Arc<dyn ConnectionObserver>,
    pub directory: SessionDirectory,
    pub shutdown: CancellationToken,
}

/// Serve `stream` on a tracked task, logging and discarding any panic.
///
/// The factory runs inside the task so a panicking factory is contained like
/// any other connection failure.
pub(in crate::server) fn spawn_connection_task<St, F>(
    stream: St,
    peer_addr: Option<SocketAddr>,
    factory: F,
    context: ConnectionContext,
    tracker: &TaskTracker,
) where
    St: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: HandlerFactory,
{
    tracker.spawn(async move {
        let served = AssertUnwindSafe(serve(stream, peer_addr, factory, context)).catch_unwind();
        if let Err(panic) = served.await {
            crate::metrics::inc_connection_panics();
            let panic_msg = panic_message(panic.as_ref());
            // Emit via both `log` and `tracing` for subscribers of either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
    });
}

async fn serve<St, F>(
    stream: St,
    peer_addr: Option<SocketAddr>,
    factory: F,
    context: ConnectionContext,
) where
    St: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: HandlerFactory,
{
    let handlers = HandlerRegistry::with_defaults().merge(factory());
    let connection = Connection::new(stream, handlers)
        .with_peer_addr(peer_addr)
        .with_config(context.config)
        .with_directory(context.directory)
        .with_shared_observer(context.observer)
        .with_shutdown(&context.shutdown);
    // `Connection::run` logs its own outcome.
    let _ = connection.run().await;
}
