//! Tokio-based TCP server for device connections.
//!
//! [`Server`] accepts terminal connections, builds each one's handler
//! registry from the factory's overrides layered over
//! [`HandlerRegistry::with_defaults`] and runs it as a
//! [`Connection`](crate::connection::Connection) registered with a shared
//! [`SessionDirectory`].

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    connection::ConnectionConfig,
    handler::HandlerRegistry,
    hooks::ConnectionObserver,
    session::{DEFAULT_OPERATION_CAPACITY, KeyExtractor, SessionDirectory, SessionTable},
};

mod binding;
mod connection;
pub mod error;
mod runtime;

pub use error::ServerError;
pub use runtime::BackoffConfig;

/// Factory producing the per-connection handler overrides.
///
/// Called once per accepted connection; the returned registry is merged over
/// the defaults, so returning [`HandlerRegistry::new`] serves the defaults
/// unchanged.
pub trait HandlerFactory: Fn() -> HandlerRegistry + Send + Sync + Clone + 'static {}

impl<F> HandlerFactory for F where F: Fn() -> HandlerRegistry + Send + Sync + Clone + 'static {}

/// TCP server for telematics terminals.
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// (not yet bound to a TCP listener) or [`Bound`]. New servers start
/// `Unbound` and must call [`Server::bind`] or [`Server::bind_listener`]
/// before running.
///
/// ```no_run
/// use std::net::SocketAddr;
///
/// use jt808::{handler::HandlerRegistry, server::Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), jt808::server::ServerError> {
/// let addr: SocketAddr = "0.0.0.0:6808".parse().expect("valid address");
/// let server = Server::new(HandlerRegistry::new).bind(addr)?;
/// let directory = server.directory();
/// # drop(directory);
/// server.run().await
/// # }
/// ```
pub struct Server<F, S = Unbound>
where
    F: HandlerFactory,
    S: ServerState,
{
    pub(crate) factory: F,
    pub(crate) config: ConnectionConfig,
    pub(crate) backoff: BackoffConfig,
    pub(crate) observer: Arc<dyn ConnectionObserver>,
    pub(crate) directory: SessionDirectory,
    pub(crate) table: Option<SessionTable>,
    /// Fired once the accept loop is running. Single use: supply a fresh
    /// sender for every run.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    /// Typestate tracking whether the server has been bound to a listener.
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

impl<F> Server<F, Unbound>
where
    F: HandlerFactory,
{
    /// Create an unbound server using `factory` for per-connection handler
    /// overrides.
    #[must_use]
    pub fn new(factory: F) -> Self {
        let (directory, table) = SessionDirectory::channel(DEFAULT_OPERATION_CAPACITY);
        Self {
            factory,
            config: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            observer: Arc::new(()),
            directory,
            table: Some(table),
            ready_tx: None,
            state: Unbound,
        }
    }
}

impl<F, S> Server<F, S>
where
    F: HandlerFactory,
    S: ServerState,
{
    /// Replace the per-connection configuration.
    #[must_use]
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the accept-loop back-off configuration.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Report connection events to `observer`.
    #[must_use]
    pub fn with_observer(self, observer: impl ConnectionObserver) -> Self {
        self.with_shared_observer(Arc::new(observer))
    }

    /// Report connection events to an observer the caller keeps a handle to.
    #[must_use]
    pub fn with_shared_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Derive directory keys with `extractor` instead of the phone number.
    ///
    /// Handles obtained from [`directory`](Self::directory) before this call
    /// still use the previous extractor.
    #[must_use]
    pub fn with_key_extractor(mut self, extractor: impl KeyExtractor) -> Self {
        self.directory = self.directory.with_key_extractor(extractor);
        self
    }

    /// Notify `tx` once the server is accepting connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Handle to the session directory shared by every connection, used to
    /// send active commands.
    #[must_use]
    pub fn directory(&self) -> SessionDirectory { self.directory.clone() }

    /// Current per-connection configuration.
    #[must_use]
    pub fn config(&self) -> ConnectionConfig { self.config }
}
