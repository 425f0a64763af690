//! Per-connection counters and the process-wide running-connection gauge.

use std::sync::atomic::{AtomicU64, Ordering};

static RUNNING_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Number of connections currently inside [`Connection::run`](super::Connection::run).
#[must_use]
pub fn running_connections() -> u64 { RUNNING_CONNECTIONS.load(Ordering::Relaxed) }

/// Held for the duration of a run; keeps the gauge and the
/// `jt808_connections_active` metric in step.
pub(super) struct RunningGuard(());

impl RunningGuard {
    pub(super) fn acquire() -> Self {
        RUNNING_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections();
        Self(())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Totals reported when a connection stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Complete messages taken off the wire, including active-command replies.
    pub frames_read: u64,
    /// Handler replies written to the device.
    pub replies_written: u64,
    /// Handler replies dropped on a full reply queue.
    pub replies_dropped: u64,
    /// Active commands written to the device.
    pub commands_written: u64,
    /// Frames discarded by the codec or reassembler.
    pub frame_errors: u64,
}

/// Live counters shared by the read and write paths.
#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) frames_read: AtomicU64,
    pub(super) replies_written: AtomicU64,
    pub(super) replies_dropped: AtomicU64,
    pub(super) commands_written: AtomicU64,
    pub(super) frame_errors: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) { counter.fetch_add(1, Ordering::Relaxed); }

    pub(super) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            replies_written: self.replies_written.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            commands_written: self.commands_written.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
        }
    }
}
