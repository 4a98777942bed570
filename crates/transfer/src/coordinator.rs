use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use peerxfer_protocol::ProgressEvent;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::TransferError;
use crate::progress::ProgressStore;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::sender::{SendOptions, Sender};
use crate::types::TransferOutcome;
use crate::validation::{PathValidator, ValidatedPath};

/// Opens a fresh stream to the receiving node for each attempt.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, TransferError>> + Send;
}

/// Files delivered by one [`Coordinator::transfer`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<TransferOutcome>,
    pub bytes: u64,
}

impl BatchReport {
    pub fn files(&self) -> usize {
        self.outcomes.len()
    }
}

/// Destination path for one file of a batch.
///
/// `relative` is the file's path below the batch's common directory. An
/// empty `dest`, a `dest` ending in `/`, or a batch of several files all
/// place the file under `dest`; otherwise `dest` names the file itself.
pub fn destination_for(relative: &str, dest: &str, multiple: bool) -> String {
    if dest.is_empty() {
        relative.to_string()
    } else if dest.ends_with('/') {
        format!("{dest}{relative}")
    } else if multiple {
        format!("{dest}/{relative}")
    } else {
        dest.to_string()
    }
}

/// Drives whole-file transfers from this node to its peer.
///
/// Files are sent one at a time, each over a fresh stream from the
/// [`Connector`]. A failed file is retried per the [`RetryPolicy`] and the
/// batch stops at the first file that cannot be delivered; files already
/// delivered stay delivered.
pub struct Coordinator<C, S = TokioSleeper> {
    validator: Arc<PathValidator>,
    store: Arc<ProgressStore>,
    connector: C,
    sleeper: S,
    retry: RetryPolicy,
    options: SendOptions,
    events: Option<mpsc::Sender<ProgressEvent>>,
    cancel: CancellationToken,
    purge_completed: bool,
}

impl<C: Connector> Coordinator<C, TokioSleeper> {
    pub fn new(validator: Arc<PathValidator>, store: Arc<ProgressStore>, connector: C) -> Self {
        Self {
            validator,
            store,
            connector,
            sleeper: TokioSleeper,
            retry: RetryPolicy::default(),
            options: SendOptions::default(),
            events: None,
            cancel: CancellationToken::new(),
            purge_completed: false,
        }
    }
}

impl<C: Connector, S: Sleeper> Coordinator<C, S> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> Coordinator<C, S2> {
        Coordinator {
            validator: self.validator,
            store: self.store,
            connector: self.connector,
            sleeper,
            retry: self.retry,
            options: self.options,
            events: self.events,
            cancel: self.cancel,
            purge_completed: self.purge_completed,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_send_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }

    /// Streams progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drops descriptors of delivered files from the store.
    pub fn with_purge_completed(mut self, purge: bool) -> Self {
        self.purge_completed = purge;
        self
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Sends every file matched by `source_pattern` to `dest` on the peer.
    pub async fn transfer(
        &self,
        source_pattern: &str,
        dest: &str,
    ) -> Result<BatchReport, TransferError> {
        let files = match self.validator.expand_sources(source_pattern) {
            Ok(files) => files,
            Err(e) => {
                self.emit(ProgressEvent::error(e.to_string())).await;
                return Err(e);
            }
        };
        let multiple = files.len() > 1;
        let names = relative_names(&files);
        info!(
            pattern = source_pattern,
            dest,
            files = files.len(),
            "starting transfer"
        );
        self.emit(ProgressEvent::info(format!(
            "transferring {} file(s) to {dest}",
            files.len()
        )))
        .await;

        let mut sender = Sender::new(Arc::clone(&self.store), self.options);
        if let Some(tx) = &self.events {
            sender = sender.with_progress(tx.clone());
        }

        let mut report = BatchReport::default();
        for (file, relative) in files.iter().zip(&names) {
            let target = destination_for(relative, dest, multiple);
            match self.send_with_retry(&sender, file, relative, &target).await {
                Ok(outcome) => {
                    if self.purge_completed {
                        self.store.remove(&outcome.transfer_id);
                    }
                    self.emit(ProgressEvent::info(format!(
                        "sent {relative} ({} bytes)",
                        outcome.bytes
                    )))
                    .await;
                    report.bytes += outcome.bytes;
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(file = %relative, error = %e, "transfer failed");
                    self.emit(ProgressEvent::error(e.to_string())).await;
                    return Err(e);
                }
            }
        }

        info!(files = report.files(), bytes = report.bytes, "transfer complete");
        self.emit(ProgressEvent::completed(format!(
            "transferred {} file(s), {} bytes",
            report.files(),
            report.bytes
        )))
        .await;
        Ok(report)
    }

    async fn send_with_retry(
        &self,
        sender: &Sender,
        file: &ValidatedPath,
        name: &str,
        target: &str,
    ) -> Result<TransferOutcome, TransferError> {
        let mut retry = 0u32;
        loop {
            let err = match self.attempt(sender, file, target).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            let Some(delay) = self.retry.delay_for(retry) else {
                if self.retry.max_retries == 0 {
                    return Err(err);
                }
                return Err(TransferError::RetriesExhausted {
                    path: name.to_string(),
                    retries: self.retry.max_retries,
                    source: Box::new(err),
                });
            };
            retry += 1;
            warn!(
                file = name,
                retry,
                max_retries = self.retry.max_retries,
                ?delay,
                error = %err,
                "retrying transfer"
            );
            self.emit(ProgressEvent::info(format!(
                "retrying {name} ({retry}/{}): {err}",
                self.retry.max_retries
            )))
            .await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        sender: &Sender,
        file: &ValidatedPath,
        target: &str,
    ) -> Result<TransferOutcome, TransferError> {
        // select! builds the connect future eagerly; never call it once cancelled.
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            stream = self.connector.connect() => stream?,
        };
        sender.send(file, target, stream, &self.cancel).await
    }

    async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Names of a batch's files relative to their deepest common directory,
/// `/`-separated. A lone file is named by its base name.
pub fn relative_names(files: &[ValidatedPath]) -> Vec<String> {
    let base = common_parent(files);
    files
        .iter()
        .map(|f| relative_name(f.as_path(), &base))
        .collect()
}

fn common_parent(files: &[ValidatedPath]) -> PathBuf {
    let Some(first) = files.first() else {
        return PathBuf::new();
    };
    let mut base = first
        .as_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    for file in &files[1..] {
        while !file.as_path().starts_with(&base) {
            if !base.pop() {
                break;
            }
        }
    }
    base
}

fn relative_name(file: &Path, base: &Path) -> String {
    let rel = file.strip_prefix(base).unwrap_or(file);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
