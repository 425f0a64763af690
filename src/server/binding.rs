//! Listener binding for [`Server`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::net::TcpListener;

use super::{Bound, HandlerFactory, Server, ServerError, ServerState, Unbound};

impl<F, S> Server<F, S>
where
    F: HandlerFactory,
    S: ServerState,
{
    fn into_bound(self, listener: TcpListener) -> Server<F, Bound> {
        let Server {
            factory,
            config,
            backoff,
            observer,
            directory,
            table,
            ready_tx,
            ..
        } = self;
        Server {
            factory,
            config,
            backoff,
            observer,
            directory,
            table,
            ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        }
    }
}

impl<F> Server<F, Unbound>
where
    F: HandlerFactory,
{
    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to `addr`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<Server<F, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_listener(std_listener)
    }

    /// Adopt an already bound standard-library listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be switched to
    /// non-blocking mode or registered with the runtime.
    pub fn bind_listener(self, std_listener: StdTcpListener) -> Result<Server<F, Bound>, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        Ok(self.into_bound(listener))
    }
}

impl<F> Server<F, Bound>
where
    F: HandlerFactory,
{
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}
