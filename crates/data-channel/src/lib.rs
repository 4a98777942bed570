//! TCP data channel between two peerxfer nodes.
//!
//! The serving node runs a [`TcpTransferServer`]; the sending node opens one
//! connection per file attempt through [`TcpConnector`]. Each connection
//! carries either a transfer stream (chunk frames one way, acks and terminal
//! frames back) or a single delete request and its result.
//!
//! # Wire format
//!
//! See [`peerxfer_protocol::wire`] for the frame encoding.

pub mod client;
pub mod error;
pub mod server;

pub use client::{TcpConnector, delete_remote};
pub use error::DataChannelError;
pub use server::TcpTransferServer;

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a fresh connection may stay silent before its first frame.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);
