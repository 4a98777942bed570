//! TCP transfer server (receiving side).
//!
//! Accepts connections until cancelled and serves each on its own task:
//! a transfer stream goes to the node's [`Receiver`], a delete request is
//! answered directly.

use std::net::SocketAddr;

use peerxfer_file_ops::delete_file;
use peerxfer_protocol::{DeleteResult, Frame, read_frame, write_frame};
use peerxfer_transfer::Receiver;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DataChannelError;
use crate::{FIRST_FRAME_TIMEOUT, TCP_BUFFER_SIZE};

/// TCP server feeding inbound streams to a [`Receiver`].
#[derive(Clone)]
pub struct TcpTransferServer {
    receiver: Receiver,
    cancel: CancellationToken,
}

impl TcpTransferServer {
    /// Cancelling `cancel` stops the accept loop and aborts open streams.
    pub fn new(receiver: Receiver, cancel: CancellationToken) -> Self {
        let receiver = receiver.with_cancel(cancel.clone());
        Self { receiver, cancel }
    }

    /// Binds the listening socket.
    pub async fn bind(addr: &str) -> Result<TcpListener, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "transfer listener bound");
        Ok(listener)
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn run(&self, listener: TcpListener) -> Result<(), DataChannelError> {
        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("transfer listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let server = self.clone();
            tokio::spawn(async move {
                match server.handle_connection(stream, addr).await {
                    Ok(()) => debug!(%addr, "connection closed"),
                    Err(e) => warn!(%addr, error = %e, "connection failed"),
                }
            });
        }
    }

    /// Serves one accepted connection to completion.
    pub async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), DataChannelError> {
        stream.set_nodelay(true)?;
        info!(%addr, "connection accepted");

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DataChannelError::Cancelled),
            result = tokio::time::timeout(FIRST_FRAME_TIMEOUT, read_frame(&mut reader)) => {
                match result {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => return Ok(()),
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };

        match first {
            Frame::Delete { path } => {
                let result = match delete_file(self.receiver.validator(), &path).await {
                    Ok(_) => DeleteResult {
                        success: true,
                        message: "file deleted successfully".into(),
                    },
                    Err(e) => {
                        warn!(%addr, path, error = %e, "remote delete refused");
                        DeleteResult {
                            success: false,
                            message: e.to_string(),
                        }
                    }
                };
                write_frame(&mut writer, &Frame::DeleteResult(result)).await?;
                writer.shutdown().await?;
                Ok(())
            }
            frame => {
                let summary = self.receiver.serve_after(frame, reader, writer).await?;
                info!(
                    %addr,
                    files = summary.files_completed,
                    bytes = summary.bytes_received,
                    "transfer stream finished"
                );
                Ok(())
            }
        }
    }
}
