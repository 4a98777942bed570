//! File operations on a node's own root: single-file delete and local copy.
//!
//! Every path goes through the node's [`PathValidator`], so nothing here can
//! touch files outside the root.
//!
//! [`PathValidator`]: peerxfer_transfer::PathValidator

mod copy;
mod delete;

pub use copy::{CopiedFile, copy_local};
pub use delete::delete_file;

use peerxfer_transfer::TransferError;

/// Errors produced by file operations.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error(transparent)]
    Path(#[from] TransferError),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("refusing to delete directory: {0}")]
    IsDirectory(String),

    #[error("refusing to operate on the root directory")]
    IsRoot,

    #[error("source and destination are the same file: {0}")]
    SamePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
