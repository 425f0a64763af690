//! Connection lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a connection. Transitions only move forward:
/// `Created → Running → Stopped`, or `Created → Stopped` when stopped before
/// it ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed but not yet running.
    Created = 0,
    /// Read and write paths are active.
    Running = 1,
    /// Stopped; the socket is released.
    Stopped = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell guarding state transitions.
#[derive(Debug)]
pub(super) struct StateCell(AtomicU8);

impl StateCell {
    pub(super) fn new() -> Self { Self(AtomicU8::new(ConnectionState::Created as u8)) }

    pub(super) fn get(&self) -> ConnectionState { ConnectionState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move from `Created` to `Running`. Returns `false` if the connection
    /// already left `Created`.
    pub(super) fn start(&self) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Created as u8,
                ConnectionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Stopped`. Returns `true` only for the call that performed the
    /// transition.
    pub(super) fn stop(&self) -> bool {
        self.0.swap(ConnectionState::Stopped as u8, Ordering::AcqRel)
            != ConnectionState::Stopped as u8
    }
}
