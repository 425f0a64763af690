//! Utilities for exercising `jt808` connections with in-memory streams
//! during tests.
//!
//! [`DeviceFrame`] builds terminal-side frames; the drive helpers run a
//! [`Connection`](jt808::connection::Connection) on a `tokio::io::duplex`
//! stream, feed it those frames and decode everything the platform sends
//! back.
//!
//! ```rust
//! use jt808::handler::{HandlerRegistry, command};
//! use jt808_testing::{DeviceFrame, drive_connection};
//!
//! # async fn example() -> std::io::Result<()> {
//! let replies = drive_connection(
//!     HandlerRegistry::with_defaults(),
//!     [DeviceFrame::heartbeat(7).encode()],
//! )
//! .await?;
//! assert_eq!(replies[0].command_id(), command::PLATFORM_REPLY);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod drive;

pub use device::{DEFAULT_PHONE, DEFAULT_SESSION_KEY, DeviceFrame, phone_fixture};
pub use drive::{DEFAULT_CAPACITY, decode_all, drive_connection, drive_connection_with_capacity};
