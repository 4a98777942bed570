//! Wire protocol for peerxfer node-to-node file transfers.
//!
//! Two kinds of types live here:
//!
//! - [`frame`]: the typed frames exchanged over a transfer stream, and
//!   [`wire`], their binary encoding.
//! - [`api`]: the JSON request/response/event types used at the edge of a
//!   node (`local:` / `peer:` addressing, NDJSON progress events).

pub mod api;
pub mod frame;
pub mod wire;

pub use api::{
    DeleteRequest, DeleteResponse, EventKind, Location, ProgressEvent, Side, TransferRequest,
};
pub use frame::{Ack, ChunkFrame, DeleteResult, ErrorCode, Frame, Terminal};
pub use wire::{read_frame, write_frame};

/// Maximum encoded frame body (16 MiB).
///
/// Must stay above the largest chunk a sender may emit plus its header.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while encoding, decoding or parsing protocol types.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame tag: {0}")]
    UnknownTag(u8),

    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("invalid location {0:?}: use 'local:' or 'peer:'")]
    InvalidLocation(String),
}
