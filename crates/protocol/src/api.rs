//! Request, response and event types used at the edge of a node.
//!
//! Paths in requests carry a side prefix: `local:` resolves against this
//! node's root, `peer:` against the paired node's root.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Which node a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Peer,
}

/// A side-prefixed path such as `local:reports/q3.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub side: Side,
    pub path: String,
}

impl Location {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (prefix, path) = raw
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidLocation(raw.to_string()))?;
        let side = match prefix {
            "local" => Side::Local,
            "peer" => Side::Peer,
            _ => return Err(ProtocolError::InvalidLocation(raw.to_string())),
        };
        Ok(Self {
            side,
            path: path.to_string(),
        })
    }
}

impl FromStr for Location {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.side {
            Side::Local => "local",
            Side::Peer => "peer",
        };
        write!(f, "{prefix}:{}", self.path)
    }
}

/// Transfer request: copy `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(alias = "source_path")]
    pub source: String,
    #[serde(alias = "dest_path", alias = "target")]
    pub destination: String,
}

/// Delete request for a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(alias = "file_path")]
    pub path: String,
}

/// Single JSON object answering a [`DeleteRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Side>,
}

/// Kind of a streamed progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Progress,
    Completed,
    Error,
}

/// One line of the newline-delimited JSON progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl ProgressEvent {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            time: Utc::now(),
            file: None,
            bytes_transferred: 0,
            total_bytes: 0,
            progress: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventKind::Info, message)
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::new(EventKind::Completed, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message)
    }

    /// Byte-level progress for one file; `progress` is a percentage.
    pub fn progress(file: impl Into<String>, bytes_transferred: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100.0
        } else {
            bytes_transferred as f64 / total_bytes as f64 * 100.0
        };
        let file = file.into();
        Self {
            message: format!("transferring {file}"),
            file: Some(file),
            bytes_transferred,
            total_bytes,
            progress: Some(percent),
            ..Self::new(EventKind::Progress, "")
        }
    }

    /// Serializes the event as one NDJSON line (with trailing newline).
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_local_and_peer() {
        let l = Location::parse("local:data/a.bin").unwrap();
        assert_eq!(l.side, Side::Local);
        assert_eq!(l.path, "data/a.bin");

        let p: Location = "peer:/incoming/".parse().unwrap();
        assert_eq!(p.side, Side::Peer);
        assert_eq!(p.path, "/incoming/");
        assert_eq!(p.to_string(), "peer:/incoming/");
    }

    #[test]
    fn parse_keeps_colons_in_path() {
        let l = Location::parse("local:logs/12:30.txt").unwrap();
        assert_eq!(l.path, "logs/12:30.txt");
    }

    #[test]
    fn parse_rejects_missing_or_unknown_prefix() {
        assert!(matches!(
            Location::parse("data/a.bin"),
            Err(ProtocolError::InvalidLocation(_))
        ));
        assert!(Location::parse("remote:a").is_err());
    }

    #[test]
    fn transfer_request_accepts_legacy_field_names() {
        let req: TransferRequest =
            serde_json::from_str(r#"{"source_path":"local:a","dest_path":"peer:b/"}"#).unwrap();
        assert_eq!(req.source, "local:a");
        assert_eq!(req.destination, "peer:b/");
    }

    #[test]
    fn delete_response_omits_missing_target() {
        let resp = DeleteResponse {
            success: true,
            message: "deleted".into(),
            target: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("target"));

        let resp = DeleteResponse {
            target: Some(Side::Peer),
            ..resp
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""target":"peer""#));
    }

    #[test]
    fn progress_event_ndjson_line() {
        let event = ProgressEvent::progress("a.bin", 50, 200);
        let line = event.to_ndjson().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: ProgressEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.kind, EventKind::Progress);
        assert_eq!(parsed.progress, Some(25.0));
        assert_eq!(parsed.file.as_deref(), Some("a.bin"));
        assert!(line.contains(r#""type":"progress""#));
    }

    #[test]
    fn progress_of_empty_file_is_complete() {
        let event = ProgressEvent::progress("empty.txt", 0, 0);
        assert_eq!(event.progress, Some(100.0));
    }
}
