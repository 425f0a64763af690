//! Directory of live device sessions.
//!
//! The directory maps a device key to the connection currently serving that
//! device. Its table is owned by a single task, [`SessionTable::run`], which
//! drains a queue of operations; every other task goes through a cloneable
//! [`SessionDirectory`] handle. Each operation is a boxed closure applied to
//! the table, so the map itself never needs a lock.
//!
//! Connections join lazily on their first keyed message, refresh the stored
//! header as later messages arrive and leave when they stop. Active commands
//! are routed through the directory to the owning connection's writer.

mod active;
mod error;
mod key;

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::Arc,
    time::SystemTime,
};

pub use active::{
    ActiveRequest,
    CommandResult,
    DEFAULT_COMMAND_TIMEOUT,
    PendingCommand,
    Responder,
};
pub use error::{ActiveCommandError, SessionError};
pub use key::{KeyExtractor, PhoneKey, SessionKey};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, warn};

use crate::{codec::Header, message::Message};

/// Default capacity of the directory's operation queue.
pub const DEFAULT_OPERATION_CAPACITY: usize = 1024;

/// Channel through which the directory hands active commands to a
/// connection's writer.
pub type SessionDelivery = mpsc::Sender<PendingCommand>;

type Operation = Box<dyn FnOnce(&mut SessionTable) + Send + 'static>;

/// Snapshot of one registered session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Directory key.
    pub key: SessionKey,
    /// Header of the most recent message seen from the device.
    pub header: Header,
    /// When the session joined.
    pub joined_at: SystemTime,
}

struct Session {
    header: Header,
    joined_at: SystemTime,
    delivery: SessionDelivery,
}

/// The directory's table, owned by the task running [`SessionTable::run`].
pub struct SessionTable {
    sessions: HashMap<SessionKey, Session>,
    operations: mpsc::Receiver<Operation>,
}

impl fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTable")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionTable {
    /// Apply queued operations until every [`SessionDirectory`] handle is
    /// dropped.
    pub async fn run(mut self) {
        debug!("session directory started");
        while let Some(operation) = self.operations.recv().await {
            operation(&mut self);
        }
        debug!(sessions = self.sessions.len(), "session directory stopped");
    }

    fn join(
        &mut self,
        key: SessionKey,
        header: Header,
        delivery: SessionDelivery,
    ) -> Result<(), SessionError> {
        let session = Session {
            header,
            joined_at: SystemTime::now(),
            delivery,
        };
        match self.sessions.entry(key) {
            Entry::Occupied(mut entry) if entry.get().delivery.is_closed() => {
                debug!(key = %entry.key(), "replacing session of a closed connection");
                entry.insert(session);
                Ok(())
            }
            Entry::Occupied(entry) => Err(SessionError::KeyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!(key = %entry.key(), "session joined");
                entry.insert(session);
                Ok(())
            }
        }
    }

    fn leave(&mut self, key: &SessionKey, owner: Option<&SessionDelivery>) {
        let Entry::Occupied(entry) = self.sessions.entry(key.clone()) else {
            return;
        };
        if owner.is_some_and(|owner| !owner.same_channel(&entry.get().delivery)) {
            return;
        }
        entry.remove();
        info!(%key, "session left");
    }

    fn refresh(&mut self, key: &SessionKey, header: Header) {
        if let Some(session) = self.sessions.get_mut(key) {
            session.header = header;
        }
    }

    fn route(&mut self, command: PendingCommand) {
        let key = command.request.key.clone();
        let Some(session) = self.sessions.get(&key) else {
            command.resolve(Err(ActiveCommandError::NotExist(key)));
            return;
        };
        match session.delivery.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!(%key, "active command queue full");
                command.resolve(Err(ActiveCommandError::InFlight));
            }
            Err(TrySendError::Closed(command)) => {
                self.sessions.remove(&key);
                command.resolve(Err(ActiveCommandError::Transport(
                    "session connection closed".into(),
                )));
            }
        }
    }

    fn info(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.sessions.get(key).map(|session| SessionInfo {
            key: key.clone(),
            header: session.header.clone(),
            joined_at: session.joined_at,
        })
    }
}

/// Cloneable handle to the session directory.
#[derive(Clone)]
pub struct SessionDirectory {
    operations: mpsc::Sender<Operation>,
    extractor: Arc<dyn KeyExtractor>,
}

impl fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("closed", &self.operations.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionDirectory {
    /// Create a handle and the table it drives.
    ///
    /// The directory does nothing until [`SessionTable::run`] is polled,
    /// typically on its own task.
    ///
    /// ```
    /// use jt808::session::{SessionDirectory, SessionKey};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let (directory, table) = SessionDirectory::channel(16);
    /// tokio::spawn(table.run());
    /// assert!(directory.session(&SessionKey::from("123")).await.is_none());
    /// # }
    /// ```
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, SessionTable) {
        let (operations, rx) = mpsc::channel(capacity.max(1));
        let directory = Self {
            operations,
            extractor: Arc::new(PhoneKey),
        };
        let table = SessionTable {
            sessions: HashMap::new(),
            operations: rx,
        };
        (directory, table)
    }

    /// Create a directory and run its table on a new Tokio task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (directory, table) = Self::channel(DEFAULT_OPERATION_CAPACITY);
        tokio::spawn(table.run());
        directory
    }

    /// Replace the policy used to derive keys from messages.
    #[must_use]
    pub fn with_key_extractor(mut self, extractor: impl KeyExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Use an already shared key extractor.
    #[must_use]
    pub fn with_shared_key_extractor(mut self, extractor: Arc<dyn KeyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Key `message` would join under, if it carries one.
    #[must_use]
    pub fn key_for(&self, message: &Message) -> Option<SessionKey> {
        self.extractor.extract(message)
    }

    /// Whether the table task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.operations.is_closed() }

    async fn submit(&self, operation: Operation) -> Result<(), SessionError> {
        self.operations
            .send(operation)
            .await
            .map_err(|_| SessionError::DirectoryClosed)
    }

    async fn query<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionTable) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |table: &mut SessionTable| {
            let _ = tx.send(f(table));
        }))
        .await?;
        rx.await.map_err(|_| SessionError::DirectoryClosed)
    }

    /// Register the connection behind `delivery` under the key derived from
    /// `message`.
    ///
    /// A key held by a connection whose delivery channel has closed is taken
    /// over.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::KeyUnavailable`] if no key can be derived,
    /// [`SessionError::KeyExists`] if a live connection holds the key and
    /// [`SessionError::DirectoryClosed`] if the table task has stopped.
    pub async fn join(
        &self,
        message: &Message,
        delivery: SessionDelivery,
    ) -> Result<SessionKey, SessionError> {
        let key = self.key_for(message).ok_or(SessionError::KeyUnavailable)?;
        let header = message.header.clone();
        let joined = key.clone();
        self.query(move |table| table.join(joined, header, delivery))
            .await??;
        Ok(key)
    }

    /// Remove `key`. Leaving an unknown key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DirectoryClosed`] if the table task has
    /// stopped.
    pub async fn leave(&self, key: &SessionKey) -> Result<(), SessionError> {
        let key = key.clone();
        self.submit(Box::new(move |table: &mut SessionTable| table.leave(&key, None)))
            .await
    }

    /// Remove `key` only while it still belongs to `owner`.
    pub(crate) async fn leave_owned(
        &self,
        key: &SessionKey,
        owner: SessionDelivery,
    ) -> Result<(), SessionError> {
        let key = key.clone();
        self.submit(Box::new(move |table: &mut SessionTable| table.leave(&key, Some(&owner))))
            .await
    }

    /// Store `header` as the latest snapshot for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DirectoryClosed`] if the table task has
    /// stopped.
    pub async fn refresh(&self, key: &SessionKey, header: Header) -> Result<(), SessionError> {
        let key = key.clone();
        self.submit(Box::new(move |table: &mut SessionTable| table.refresh(&key, header)))
            .await
    }

    /// Hand `request` to the connection serving its key.
    ///
    /// The returned receiver resolves immediately with
    /// [`ActiveCommandError::NotExist`] for an unknown key; otherwise it
    /// resolves once the device replies or delivery fails. No timeout is
    /// applied here; see [`send_command`](Self::send_command).
    pub async fn route(&self, request: ActiveRequest) -> oneshot::Receiver<CommandResult> {
        let (responder, rx) = oneshot::channel();
        let command = PendingCommand { request, responder };
        // A closed directory drops the command, which closes the receiver.
        let _ = self
            .submit(Box::new(move |table: &mut SessionTable| table.route(command)))
            .await;
        rx
    }

    /// Send `request` and wait for the device's reply.
    ///
    /// # Errors
    ///
    /// Returns [`ActiveCommandError::Timeout`] once `request.timeout`
    /// elapses, [`ActiveCommandError::NotExist`] for an unknown key and
    /// [`ActiveCommandError::Transport`] or [`ActiveCommandError::InFlight`]
    /// when the connection cannot carry the command. Nothing is retried.
    pub async fn send_command(&self, request: ActiveRequest) -> CommandResult {
        let limit = request.timeout;
        let exchange = async {
            match self.route(request).await.await {
                Ok(outcome) => outcome,
                Err(_) if self.is_closed() => Err(ActiveCommandError::Closed),
                Err(_) => Err(ActiveCommandError::Transport(
                    "command dropped before a reply arrived".into(),
                )),
            }
        };
        tokio::time::timeout(limit, exchange)
            .await
            .unwrap_or(Err(ActiveCommandError::Timeout(limit)))
    }

    /// Snapshot of the session registered under `key`.
    pub async fn session(&self, key: &SessionKey) -> Option<SessionInfo> {
        let key = key.clone();
        self.query(move |table| table.info(&key)).await.ok().flatten()
    }

    /// Keys of every registered session, sorted.
    pub async fn keys(&self) -> Vec<SessionKey> {
        self.query(|table| {
            let mut keys: Vec<_> = table.sessions.keys().cloned().collect();
            keys.sort_unstable();
            keys
        })
        .await
        .unwrap_or_default()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.query(|table| table.sessions.len())
            .await
            .unwrap_or_default()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool { self.len().await == 0 }
}
