//! Runtime control for [`Server`].

mod accept;
mod backoff;

use std::sync::Arc;

use accept::{AcceptListener, AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Bound, HandlerFactory, Server, ServerError, connection::ConnectionContext};

impl<F> Server<F, Bound>
where
    F: HandlerFactory,
{
    /// Run the server until Ctrl+C is received.
    ///
    /// Attempting to run a server without binding fails to compile:
    ///
    /// ```compile_fail
    /// use jt808::{handler::HandlerRegistry, server::Server};
    ///
    /// async fn try_run() {
    ///     Server::new(HandlerRegistry::new)
    ///         .run()
    ///         .await
    ///         .expect("unbound servers do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are retried with
    /// exponential back-off and do not surface as errors.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for Ctrl+C: error={e}");
            }
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// On shutdown the accept loop stops, every open connection is stopped
    /// and the call returns once all connection tasks have finished.
    ///
    /// ```
    /// use tokio::sync::oneshot;
    /// use jt808::{handler::HandlerRegistry, server::Server};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), jt808::server::ServerError> {
    /// let server = Server::new(HandlerRegistry::new).bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are retried with
    /// exponential back-off and do not surface as errors.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let Server {
            factory,
            config,
            backoff,
            observer,
            directory,
            table,
            ready_tx,
            state: Bound { listener },
        } = self;
        if let Some(table) = table {
            tokio::spawn(table.run());
        }
        info!(
            "server listening: local_addr={:?}",
            listener.local_addr().ok()
        );

        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let options = AcceptLoopOptions {
            context: ConnectionContext {
                config,
                observer,
                directory,
                shutdown: shutdown_token.clone(),
            },
            shutdown: shutdown_token.clone(),
            tracker: tracker.clone(),
            backoff,
        };
        serve_until(listener, factory, options, ready_tx, shutdown).await;
        info!("server stopped");
        Ok(())
    }
}

/// Drive the accept loop until `shutdown` resolves, then drain connections.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub(super) async fn serve_until<F, L, S>(
    listener: Arc<L>,
    factory: F,
    options: AcceptLoopOptions,
    ready_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown: S,
) where
    F: HandlerFactory,
    L: AcceptListener + 'static,
    S: Future<Output = ()> + Send,
{
    let token = options.shutdown.clone();
    let tracker = options.tracker.clone();
    tracker.spawn(accept_loop(listener, factory, options));

    if let Some(tx) = ready_tx
        && tx.send(()).is_err()
    {
        warn!("Failed to send readiness signal: receiver dropped");
    }

    select! {
        () = shutdown => token.cancel(),
        () = tracker.wait() => {},
    }

    tracker.close();
    tracker.wait().await;
}
