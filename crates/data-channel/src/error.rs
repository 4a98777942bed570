//! Error types for the data channel.

use peerxfer_protocol::ProtocolError;
use peerxfer_transfer::TransferError;

/// Errors produced by the TCP data channel.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}
