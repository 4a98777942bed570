//! Node configuration.
//!
//! Read from an optional TOML file, then overridden by `PEERXFER_*`
//! environment variables. Missing keys fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use peerxfer_transfer::{
    AbsolutePathPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY, FlowControl, MAX_CHUNK_SIZE, RetryPolicy, SendOptions,
};
use serde::{Deserialize, Serialize};

/// Default port for the transfer listener.
pub const DEFAULT_PORT: u16 = 9470;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the transfer server listens on.
    pub listen_addr: String,
    /// Address of the paired node's transfer server.
    pub peer_addr: String,
    /// Directory every local path is confined to.
    pub root: PathBuf,
    pub chunk_size: usize,
    pub flow_control: FlowControl,
    pub absolute_paths: AbsolutePathPolicy,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Per-reply wait on the sending side; 0 disables it.
    pub io_timeout_secs: u64,
    /// Inbound stream silence limit; 0 disables it.
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            peer_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            root: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            flow_control: FlowControl::default(),
            absolute_paths: AbsolutePathPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            io_timeout_secs: DEFAULT_IO_TIMEOUT.as_secs(),
            idle_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Loads the file at `path` (if any), applies environment overrides and
    /// validates the result.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Applies `PEERXFER_*` overrides looked up through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(v) = lookup("PEERXFER_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("PEERXFER_PEER_ADDR") {
            self.peer_addr = v;
        }
        if let Some(v) = lookup("PEERXFER_ROOT") {
            self.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("PEERXFER_CHUNK_SIZE") {
            self.chunk_size = v
                .parse()
                .with_context(|| format!("PEERXFER_CHUNK_SIZE: invalid size {v:?}"))?;
        }
        if let Some(v) = lookup("PEERXFER_FLOW_CONTROL") {
            self.flow_control = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!("PEERXFER_FLOW_CONTROL: {e}"))?;
        }
        if let Some(v) = lookup("PEERXFER_ABSOLUTE_PATHS") {
            self.absolute_paths = match v.as_str() {
                "rebase" => AbsolutePathPolicy::Rebase,
                "reject" => AbsolutePathPolicy::Reject,
                other => bail!(
                    "PEERXFER_ABSOLUTE_PATHS: unknown policy {other:?} (expected 'rebase' or 'reject')"
                ),
            };
        }
        Ok(())
    }

    /// Checks that the root is an existing, writable directory and the
    /// chunk size is in range.
    pub fn validate(&self) -> anyhow::Result<()> {
        let meta = std::fs::metadata(&self.root)
            .with_context(|| format!("root {} is not accessible", self.root.display()))?;
        if !meta.is_dir() {
            bail!("root {} is not a directory", self.root.display());
        }

        let probe = self
            .root
            .join(format!(".peerxfer-write-probe-{}", std::process::id()));
        std::fs::write(&probe, b"")
            .with_context(|| format!("root {} is not writable", self.root.display()))?;
        let _ = std::fs::remove_file(&probe);

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            bail!(
                "chunk_size {} out of range (1..={MAX_CHUNK_SIZE})",
                self.chunk_size
            );
        }
        Ok(())
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            chunk_size: self.chunk_size,
            flow: self.flow_control,
            io_timeout: secs(self.io_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        secs(self.idle_timeout_secs)
    }
}

fn secs(n: u64) -> Option<Duration> {
    (n > 0).then(|| Duration::from_secs(n))
}
