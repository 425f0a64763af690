#![doc(html_root_url = "https://docs.rs/jt808/latest")]
//! Server-side building blocks for the JT/T 808 vehicle telematics protocol.
//!
//! The crate covers the whole path from socket bytes to session-aware
//! dispatch: a stateless frame [`codec`], per-stream [`reassembly`] of frames
//! and sub-packages, a [`handler`] registry with the standard replies, the
//! per-connection engine in [`connection`], the [`session`] directory used
//! for platform-initiated commands and a TCP [`server`] tying them together.

pub mod byte_order;
pub mod codec;
pub mod connection;
pub mod handler;
pub mod hooks;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod reassembly;
pub mod server;
pub mod session;

pub use codec::{FrameError, Header, ProtocolVersion, decode_frame, encode_frame};
pub use connection::{Connection, ConnectionConfig, ConnectionError, ConnectionId, ConnectionStats};
pub use handler::{Handler, HandlerError, HandlerRegistry};
pub use hooks::ConnectionObserver;
pub use message::Message;
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use reassembly::StreamReassembler;
pub use server::{Server, ServerError};
pub use session::{ActiveCommandError, ActiveRequest, SessionDirectory, SessionKey};
