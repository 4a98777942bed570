//! Chunked file transfer between two peerxfer nodes.
//!
//! The sending node expands a source pattern under its root, slices each
//! file into SHA-256 digested chunks and streams them to the peer. The
//! receiving node verifies each chunk, rebuilds the file under its own root
//! and answers with acknowledgments and one terminal outcome per file.
//! Both sides record what they see in their own [`ProgressStore`].

mod chunked;
mod coordinator;
mod progress;
mod receiver;
mod retry;
mod sender;
mod types;
mod validation;

pub use chunked::{ChunkReader, calculate_file_checksum, checksum_bytes};
pub use coordinator::{BatchReport, Connector, Coordinator, destination_for, relative_names};
pub use progress::ProgressStore;
pub use receiver::{Receiver, ReceiverMachine, ReceiverPhase, StreamSummary};
pub use retry::{
    Backoff, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, Sleeper, TokioSleeper,
};
pub use sender::{DEFAULT_IO_TIMEOUT, SendOptions, Sender};
pub use types::{
    Chunk, FlowControl, TransferDescriptor, TransferId, TransferOutcome, TransferStatus,
};
pub use validation::{AbsolutePathPolicy, PathValidator, ValidatedPath, wildcard_match};

use peerxfer_protocol::{ErrorCode, ProtocolError};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk a sender may emit: 8 MiB.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("path traversal detected in path: {0}")]
    Traversal(String),

    #[error("path {0:?} is outside the allowed directory")]
    OutsideRoot(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no files match pattern: {0}")]
    NoMatch(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("checksum mismatch at offset {offset}")]
    IntegrityMismatch { offset: u64 },

    #[error("incomplete transfer: received {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("chunk out of order: expected offset {expected}, got {offset}")]
    OutOfOrder { expected: u64, offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer reported {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    Timeout,

    #[error("failed to transfer {path} after {retries} retries: {source}")]
    RetriesExhausted {
        path: String,
        retries: u32,
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Wire code reported to the peer for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Traversal(_)
            | Self::OutsideRoot(_)
            | Self::InvalidPath(_)
            | Self::NoMatch(_)
            | Self::Protocol(_) => ErrorCode::InvalidArgument,
            Self::IntegrityMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::OutOfOrder { .. } => ErrorCode::DataLoss,
            Self::Io(_) => ErrorCode::Internal,
            Self::Transport(_) | Self::Cancelled | Self::Timeout => ErrorCode::Unavailable,
            Self::Remote { code, .. } => *code,
            Self::RetriesExhausted { source, .. } => source.code(),
        }
    }

    /// Whether a whole-file re-attempt may succeed.
    ///
    /// Validation failures, protocol violations and cancellation are final;
    /// so is a peer rejecting the request as an invalid argument.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Traversal(_)
            | Self::OutsideRoot(_)
            | Self::InvalidPath(_)
            | Self::NoMatch(_)
            | Self::Protocol(_)
            | Self::Cancelled
            | Self::RetriesExhausted { .. } => false,
            Self::Remote { code, .. } => *code != ErrorCode::InvalidArgument,
            Self::IntegrityMismatch { .. }
            | Self::SizeMismatch { .. }
            | Self::OutOfOrder { .. }
            | Self::Io(_)
            | Self::Transport(_)
            | Self::Timeout => true,
        }
    }
}

impl From<ProtocolError> for TransferError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => Self::Transport(io.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_error_kind() {
        assert_eq!(
            TransferError::Traversal("../x".into()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            TransferError::IntegrityMismatch { offset: 0 }.code(),
            ErrorCode::DataLoss
        );
        assert_eq!(
            TransferError::SizeMismatch {
                expected: 2,
                actual: 1
            }
            .code(),
            ErrorCode::DataLoss
        );
        assert_eq!(
            TransferError::Io(std::io::Error::other("disk full")).code(),
            ErrorCode::Internal
        );
        assert_eq!(
            TransferError::Transport("reset".into()).code(),
            ErrorCode::Unavailable
        );
    }

    #[test]
    fn retry_classification() {
        assert!(TransferError::Transport("refused".into()).is_retryable());
        assert!(TransferError::IntegrityMismatch { offset: 4 }.is_retryable());
        assert!(!TransferError::OutsideRoot("/etc".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(
            !TransferError::Remote {
                code: ErrorCode::InvalidArgument,
                message: "bad path".into()
            }
            .is_retryable()
        );
        assert!(
            TransferError::Remote {
                code: ErrorCode::Internal,
                message: "disk full".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn protocol_io_errors_become_transport() {
        let err: TransferError =
            ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).into();
        assert!(matches!(err, TransferError::Transport(_)));

        let err: TransferError = ProtocolError::UnknownTag(9).into();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn exhausted_message_names_retry_count() {
        let err = TransferError::RetriesExhausted {
            path: "a.bin".into(),
            retries: 3,
            source: Box::new(TransferError::Transport("refused".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 retries"));
        assert!(msg.contains("a.bin"));
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
