//! Typed frames carried on a transfer stream.

use std::fmt;

/// Outcome code carried by [`Terminal`] frames.
///
/// The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    /// Bad path or protocol-sequence violation.
    InvalidArgument = 1,
    /// Digest or byte-count mismatch.
    DataLoss = 2,
    /// Local I/O failure on the receiving side.
    Internal = 3,
    /// Connection or transport failure.
    Unavailable = 4,
}

impl ErrorCode {
    /// Decodes a wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidArgument),
            2 => Some(Self::DataLoss),
            3 => Some(Self::Internal),
            4 => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidArgument => "invalid-argument",
            Self::DataLoss => "data-loss",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slice of a file, sender to receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Identifier of the file in flight.
    pub transfer_id: String,
    /// Destination path as requested by the sender (validated by the receiver).
    pub dest_path: String,
    /// Declared size of the whole file.
    pub total_size: u64,
    /// Byte position of `data` within the file.
    pub offset: u64,
    /// SHA-256 hex digest of `data`.
    pub digest: String,
    pub is_last: bool,
    pub data: Vec<u8>,
}

/// Per-chunk acknowledgment, receiver to sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub transfer_id: String,
    pub success: bool,
    pub message: String,
    pub bytes_received: u64,
}

/// Final outcome for one file, sent exactly once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub transfer_id: String,
    pub code: ErrorCode,
    pub message: String,
    pub final_bytes: u64,
}

impl Terminal {
    pub fn success(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

/// Reply to a [`Frame::Delete`] request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub success: bool,
    pub message: String,
}

/// Every frame that can appear on a transfer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(ChunkFrame),
    Ack(Ack),
    Terminal(Terminal),
    /// Request to delete a file under the receiver's root.
    Delete { path: String },
    DeleteResult(DeleteResult),
}

impl Frame {
    pub const TAG_CHUNK: u8 = 1;
    pub const TAG_ACK: u8 = 2;
    pub const TAG_TERMINAL: u8 = 3;
    pub const TAG_DELETE: u8 = 4;
    pub const TAG_DELETE_RESULT: u8 = 5;

    /// Wire tag of this frame.
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Chunk(_) => Self::TAG_CHUNK,
            Frame::Ack(_) => Self::TAG_ACK,
            Frame::Terminal(_) => Self::TAG_TERMINAL,
            Frame::Delete { .. } => Self::TAG_DELETE,
            Frame::DeleteResult(_) => Self::TAG_DELETE_RESULT,
        }
    }

    /// Short name used in log lines and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Chunk(_) => "chunk",
            Frame::Ack(_) => "ack",
            Frame::Terminal(_) => "terminal",
            Frame::Delete { .. } => "delete",
            Frame::DeleteResult(_) => "delete-result",
        }
    }

    /// Rough encoded size, used to pre-size the encode buffer.
    pub(crate) fn size_hint(&self) -> usize {
        match self {
            Frame::Chunk(c) => 64 + c.transfer_id.len() + c.dest_path.len() + c.data.len(),
            _ => 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrips_through_u8() {
        for code in [
            ErrorCode::Ok,
            ErrorCode::InvalidArgument,
            ErrorCode::DataLoss,
            ErrorCode::Internal,
            ErrorCode::Unavailable,
        ] {
            assert_eq!(ErrorCode::from_u8(code as u8), Some(code));
        }
        assert_eq!(ErrorCode::from_u8(9), None);
    }

    #[test]
    fn error_code_display() {
        assert_eq!(ErrorCode::DataLoss.to_string(), "data-loss");
        assert_eq!(ErrorCode::InvalidArgument.to_string(), "invalid-argument");
    }

    #[test]
    fn terminal_success_follows_code() {
        let mut t = Terminal {
            transfer_id: "t1".into(),
            code: ErrorCode::Ok,
            message: "done".into(),
            final_bytes: 3,
        };
        assert!(t.success());
        t.code = ErrorCode::Internal;
        assert!(!t.success());
    }

    #[test]
    fn tags_are_distinct() {
        let frames = [
            Frame::Chunk(ChunkFrame {
                transfer_id: String::new(),
                dest_path: String::new(),
                total_size: 0,
                offset: 0,
                digest: String::new(),
                is_last: true,
                data: Vec::new(),
            }),
            Frame::Ack(Ack {
                transfer_id: String::new(),
                success: true,
                message: String::new(),
                bytes_received: 0,
            }),
            Frame::Delete { path: "a".into() },
        ];
        assert_eq!(frames[0].tag(), Frame::TAG_CHUNK);
        assert_eq!(frames[1].tag(), Frame::TAG_ACK);
        assert_eq!(frames[2].tag(), Frame::TAG_DELETE);
        assert_eq!(frames[2].name(), "delete");
    }
}
