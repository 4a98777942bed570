//! TCP client side: connections for the transfer coordinator and remote
//! delete requests.

use std::future::Future;
use std::time::Duration;

use peerxfer_protocol::{DeleteResult, Frame, read_frame, write_frame};
use peerxfer_transfer::{Connector, TransferError};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::TCP_CONNECT_TIMEOUT;
use crate::error::DataChannelError;

/// Opens TCP connections to the peer's transfer server.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: TCP_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn open(&self) -> Result<TcpStream, TransferError> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(TransferError::Transport(format!(
                    "connect to {}: {e}",
                    self.addr
                )));
            }
            Err(_) => return Err(TransferError::Timeout),
        };
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "peer connection opened");
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = Result<TcpStream, TransferError>> + Send {
        self.open()
    }
}

/// Asks the peer to delete `path` under its root.
pub async fn delete_remote(
    connector: &TcpConnector,
    path: &str,
    cancel: &CancellationToken,
) -> Result<DeleteResult, DataChannelError> {
    let work = async {
        let mut stream = connector.open().await?;
        write_frame(
            &mut stream,
            &Frame::Delete {
                path: path.to_string(),
            },
        )
        .await?;
        match read_frame(&mut stream).await? {
            Some(Frame::DeleteResult(result)) => Ok(result),
            Some(other) => Err(DataChannelError::UnexpectedFrame(other.name())),
            None => Err(DataChannelError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            ))),
        }
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DataChannelError::Cancelled),
        result = work => result?,
    };
    info!(path, success = result.success, "remote delete answered");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use peerxfer_transfer::{Coordinator, PathValidator, ProgressStore, Receiver, RetryPolicy};

    use crate::server::TcpTransferServer;

    struct Nodes {
        src: tempfile::TempDir,
        dst: tempfile::TempDir,
        addr: String,
        cancel: CancellationToken,
    }

    async fn start() -> Nodes {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let receiver = Receiver::new(
            Arc::new(PathValidator::new(dst.path()).unwrap()),
            Arc::new(ProgressStore::new()),
        );
        let server = TcpTransferServer::new(receiver, cancel.clone());
        let listener = TcpTransferServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move { server.run(listener).await });
        Nodes {
            src,
            dst,
            addr,
            cancel,
        }
    }

    /// Integration test: coordinator -> server full pipeline with temp files.
    #[tokio::test]
    async fn client_server_integration() {
        let nodes = start().await;
        std::fs::write(nodes.src.path().join("game.exe"), b"EXECUTABLE_DATA").unwrap();
        std::fs::write(nodes.src.path().join("data.bin"), b"BINARY_DATA_HERE").unwrap();

        let coordinator = Coordinator::new(
            Arc::new(PathValidator::new(nodes.src.path()).unwrap()),
            Arc::new(ProgressStore::new()),
            TcpConnector::new(nodes.addr.clone()),
        )
        .with_retry(RetryPolicy::none());
        let report = coordinator.transfer("*", "incoming/").await.unwrap();
        assert_eq!(report.files(), 2);
        assert_eq!(report.bytes, 31);

        let received_exe = std::fs::read(nodes.dst.path().join("incoming/game.exe")).unwrap();
        assert_eq!(received_exe, b"EXECUTABLE_DATA");
        let received_data = std::fs::read(nodes.dst.path().join("incoming/data.bin")).unwrap();
        assert_eq!(received_data, b"BINARY_DATA_HERE");

        nodes.cancel.cancel();
    }

    #[tokio::test]
    async fn delete_remote_file() {
        let nodes = start().await;
        std::fs::write(nodes.dst.path().join("stale.log"), b"x").unwrap();
        let connector = TcpConnector::new(nodes.addr.clone());

        let result = delete_remote(&connector, "stale.log", &nodes.cancel)
            .await
            .unwrap();
        assert!(result.success);
        assert!(!nodes.dst.path().join("stale.log").exists());

        let result = delete_remote(&connector, "stale.log", &nodes.cancel)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("not found"));

        nodes.cancel.cancel();
    }

    #[tokio::test]
    async fn refused_connection_is_retryable_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpConnector::new(addr).connect().await.unwrap_err();
        assert!(matches!(err, TransferError::Transport(_)));
        assert!(err.is_retryable());
    }
}
