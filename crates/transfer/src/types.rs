use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one file in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chunk of file data read by [`ChunkReader`](crate::ChunkReader).
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex digest of `data`.
    pub digest: String,
    /// No more chunks follow for this file.
    pub is_last: bool,
}

/// Lifecycle state of a tracked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InProgress,
    Completed,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Snapshot of one transfer as recorded by a [`ProgressStore`](crate::ProgressStore).
///
/// On the receiving side `source` holds the path as requested by the peer
/// and `destination` the resolved local path.
#[derive(Debug, Clone, Serialize)]
pub struct TransferDescriptor {
    pub id: TransferId,
    pub source: String,
    pub destination: String,
    pub total_size: u64,
    pub bytes_transferred: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) started: Instant,
}

impl TransferDescriptor {
    /// Percentage of the declared size transferred, in `[0, 100]`.
    ///
    /// A zero-sized transfer reports 0 until it completes, then 100.
    pub fn percent_complete(&self) -> f64 {
        if self.status == TransferStatus::Completed {
            return 100.0;
        }
        if self.total_size == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_size as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Average rate since the transfer started, in bytes per second.
    pub fn transfer_rate(&self) -> f64 {
        self.transfer_rate_at(Instant::now())
    }

    /// Average rate as of `now`; 0 when no time has elapsed.
    pub fn transfer_rate_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_transferred as f64 / elapsed.as_secs_f64()
    }

    /// Time since the transfer was registered.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Terminal result of sending one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transfer_id: TransferId,
    pub source: PathBuf,
    pub destination: String,
    pub success: bool,
    pub message: String,
    pub bytes: u64,
}

/// How a sender paces chunks against acknowledgments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowControl {
    /// Wait for each chunk's acknowledgment before sending the next.
    #[default]
    Lockstep,
    /// Send every chunk back-to-back, then wait for the terminal outcome.
    FreeRunning,
}

impl FromStr for FlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lockstep" => Ok(Self::Lockstep),
            "free-running" | "free_running" => Ok(Self::FreeRunning),
            other => Err(format!(
                "unknown flow control {other:?} (expected 'lockstep' or 'free-running')"
            )),
        }
    }
}
