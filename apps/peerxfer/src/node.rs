//! Request routing for one node.
//!
//! `local:` paths resolve under this node's root, `peer:` paths under the
//! paired node's. Transfers report through NDJSON [`ProgressEvent`] lines.

use std::sync::Arc;

use anyhow::bail;
use peerxfer_data_channel::{TcpConnector, TcpTransferServer, delete_remote};
use peerxfer_file_ops::{copy_local, delete_file};
use peerxfer_protocol::{
    DeleteRequest, DeleteResponse, Location, ProgressEvent, Side, TransferRequest,
};
use peerxfer_transfer::{Coordinator, PathValidator, ProgressStore, Receiver};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;

const EVENT_BUFFER: usize = 64;

pub struct Node {
    config: Config,
    validator: Arc<PathValidator>,
    store: Arc<ProgressStore>,
    cancel: CancellationToken,
}

impl Node {
    pub fn new(config: Config, cancel: CancellationToken) -> anyhow::Result<Self> {
        let validator = PathValidator::new(&config.root)?.with_policy(config.absolute_paths);
        Ok(Self {
            config,
            validator: Arc::new(validator),
            store: Arc::new(ProgressStore::new()),
            cancel,
        })
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Runs the transfer server until cancelled.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let mut receiver = Receiver::new(Arc::clone(&self.validator), Arc::clone(&self.store));
        if let Some(limit) = self.config.idle_timeout() {
            receiver = receiver.with_idle_timeout(limit);
        }
        let listener = TcpTransferServer::bind(&self.config.listen_addr).await?;
        info!(root = %self.validator.root().display(), "serving transfers");
        TcpTransferServer::new(receiver, self.cancel.clone())
            .run(listener)
            .await?;
        Ok(())
    }

    /// Executes `request`, writing progress events to `out`.
    pub async fn transfer<W>(&self, request: &TransferRequest, out: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let route = Location::parse(&request.source)
            .and_then(|src| Location::parse(&request.destination).map(|dst| (src, dst)));
        let (source, dest) = match route {
            Ok(route) => route,
            Err(e) => {
                write_event(out, &ProgressEvent::error(e.to_string())).await?;
                return Err(e.into());
            }
        };

        match (source.side, dest.side) {
            (Side::Local, Side::Peer) => self.send_to_peer(&source.path, &dest.path, out).await,
            (Side::Local, Side::Local) => self.copy_within(&source.path, &dest.path, out).await,
            (Side::Peer, _) => {
                let msg = "transfers from the peer are not supported; run the transfer on the peer";
                write_event(out, &ProgressEvent::error(msg)).await?;
                bail!(msg);
            }
        }
    }

    async fn send_to_peer<W>(&self, pattern: &str, dest: &str, out: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let coordinator = Coordinator::new(
            Arc::clone(&self.validator),
            Arc::clone(&self.store),
            TcpConnector::new(self.config.peer_addr.clone()),
        )
        .with_retry(self.config.retry_policy())
        .with_send_options(self.config.send_options())
        .with_events(tx)
        .with_cancel(self.cancel.clone())
        .with_purge_completed(true);

        let run = async move {
            let result = coordinator.transfer(pattern, dest).await;
            // Closes the event channel.
            drop(coordinator);
            result
        };
        let drain = async {
            while let Some(event) = rx.recv().await {
                write_event(out, &event).await?;
            }
            anyhow::Ok(())
        };

        let (result, written) = tokio::join!(run, drain);
        written?;
        result?;
        Ok(())
    }

    async fn copy_within<W>(&self, pattern: &str, dest: &str, out: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match copy_local(&self.validator, pattern, dest).await {
            Ok(copied) => {
                let bytes: u64 = copied.iter().map(|c| c.bytes).sum();
                for file in &copied {
                    let event = ProgressEvent::progress(
                        file.destination.display().to_string(),
                        file.bytes,
                        file.bytes,
                    );
                    write_event(out, &event).await?;
                }
                let done = ProgressEvent::completed(format!(
                    "copied {} file(s), {bytes} bytes",
                    copied.len()
                ));
                write_event(out, &done).await?;
                Ok(())
            }
            Err(e) => {
                warn!(pattern, dest, error = %e, "local copy failed");
                write_event(out, &ProgressEvent::error(e.to_string())).await?;
                Err(e.into())
            }
        }
    }

    /// Deletes one file, locally or on the peer.
    pub async fn delete(&self, request: &DeleteRequest) -> DeleteResponse {
        let location = match Location::parse(&request.path) {
            Ok(location) => location,
            Err(e) => {
                return DeleteResponse {
                    success: false,
                    message: e.to_string(),
                    target: None,
                };
            }
        };

        let outcome = match location.side {
            Side::Local => delete_file(&self.validator, &location.path)
                .await
                .map(|_| "file deleted successfully".to_string())
                .map_err(|e| e.to_string()),
            Side::Peer => {
                let connector = TcpConnector::new(self.config.peer_addr.clone());
                match delete_remote(&connector, &location.path, &self.cancel).await {
                    Ok(result) if result.success => Ok(result.message),
                    Ok(result) => Err(result.message),
                    Err(e) => Err(e.to_string()),
                }
            }
        };

        match outcome {
            Ok(message) => DeleteResponse {
                success: true,
                message,
                target: Some(location.side),
            },
            Err(message) => DeleteResponse {
                success: false,
                message,
                target: Some(location.side),
            },
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin>(
    out: &mut W,
    event: &ProgressEvent,
) -> anyhow::Result<()> {
    out.write_all(event.to_ndjson()?.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
