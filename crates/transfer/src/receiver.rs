//! Receiving side of a file transfer.
//!
//! A [`ReceiverMachine`] consumes the frames of one stream. Chunks for a new
//! transfer id open a fresh destination file (finalizing any previous one),
//! chunks for the current id are verified and appended. Every accepted chunk
//! is acknowledged and every file ends with exactly one terminal frame.
//! The first failure aborts the current file, removes the partial output and
//! ends the stream.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use peerxfer_protocol::{Ack, ChunkFrame, ErrorCode, Frame, Terminal, read_frame, write_frame};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::checksum_bytes;
use crate::progress::ProgressStore;
use crate::types::{TransferId, TransferStatus};
use crate::validation::PathValidator;

const FILE_BUFFER_SIZE: usize = 256 * 1024;

/// Where a [`ReceiverMachine`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    /// No frame seen yet.
    Idle,
    /// A destination file is open and accepting chunks.
    Receiving,
    /// Flushing and checking the byte count of the current file.
    Finalizing,
    /// The last file finished successfully; another id may follow.
    Completed,
    /// The stream was aborted.
    Failed,
}

/// Totals for one served stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub files_completed: usize,
    pub bytes_received: u64,
}

struct OpenFile {
    id: TransferId,
    path: PathBuf,
    file: BufWriter<File>,
    total: u64,
    received: u64,
}

/// Frame-by-frame receiver for one stream.
pub struct ReceiverMachine {
    validator: Arc<PathValidator>,
    store: Arc<ProgressStore>,
    open: Option<OpenFile>,
    phase: ReceiverPhase,
    frames_seen: u64,
    last_id: Option<String>,
    /// Ids finished on this stream; a repeat is never reopened.
    finished: HashSet<String>,
    outbox: Vec<Frame>,
    summary: StreamSummary,
}

impl ReceiverMachine {
    pub fn new(validator: Arc<PathValidator>, store: Arc<ProgressStore>) -> Self {
        Self {
            validator,
            store,
            open: None,
            phase: ReceiverPhase::Idle,
            frames_seen: 0,
            last_id: None,
            finished: HashSet::new(),
            outbox: Vec::new(),
            summary: StreamSummary::default(),
        }
    }

    pub fn phase(&self) -> ReceiverPhase {
        self.phase
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Id of the file currently being written, if any.
    pub fn current_transfer(&self) -> Option<&TransferId> {
        self.open.as_ref().map(|o| &o.id)
    }

    /// Frames to send back to the peer, in order.
    pub fn take_replies(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.outbox)
    }

    /// Applies one inbound frame.
    ///
    /// On error the caller must call [`abort`](Self::abort) and end the
    /// stream; replies queued before the error are still valid.
    pub async fn handle(&mut self, frame: Frame) -> Result<(), TransferError> {
        let first = self.frames_seen == 0;
        self.frames_seen += 1;
        match frame {
            Frame::Chunk(chunk) => self.on_chunk(chunk).await,
            other if first => Err(TransferError::Protocol(format!(
                "expected chunk as first frame, got {}",
                other.name()
            ))),
            other => Err(TransferError::Protocol(format!(
                "unexpected {} frame on transfer stream",
                other.name()
            ))),
        }
    }

    /// End of input: finalizes the open file, if any.
    pub async fn finish(&mut self) -> Result<(), TransferError> {
        self.finalize().await
    }

    /// Fails the current file and returns the terminal frame describing
    /// `err`. The partial destination file is removed.
    pub async fn abort(&mut self, err: &TransferError) -> Frame {
        self.phase = ReceiverPhase::Failed;
        let (transfer_id, final_bytes) = match self.open.take() {
            Some(open) => {
                self.store.fail(&open.id, err.to_string());
                let mut file = open.file;
                let _ = file.flush().await;
                drop(file);
                if let Err(e) = tokio::fs::remove_file(&open.path).await {
                    warn!(path = %open.path.display(), error = %e, "failed to remove partial file");
                }
                warn!(transfer_id = %open.id, error = %err, "transfer aborted");
                (open.id.to_string(), open.received)
            }
            None => {
                warn!(error = %err, "stream rejected");
                (self.last_id.clone().unwrap_or_default(), 0)
            }
        };
        Frame::Terminal(Terminal {
            transfer_id,
            code: err.code(),
            message: err.to_string(),
            final_bytes,
        })
    }

    async fn on_chunk(&mut self, chunk: ChunkFrame) -> Result<(), TransferError> {
        let same = self
            .open
            .as_ref()
            .is_some_and(|o| o.id.as_str() == chunk.transfer_id);
        if !same {
            self.finalize().await?;
            self.open_file(&chunk).await?;
        }
        let Some(open) = self.open.as_mut() else {
            return Err(TransferError::Protocol("no open transfer".into()));
        };

        if checksum_bytes(&chunk.data) != chunk.digest {
            return Err(TransferError::IntegrityMismatch {
                offset: chunk.offset,
            });
        }
        if chunk.total_size != open.total {
            return Err(TransferError::Protocol(format!(
                "declared size changed from {} to {}",
                open.total, chunk.total_size
            )));
        }
        if chunk.offset != open.received {
            return Err(TransferError::OutOfOrder {
                expected: open.received,
                offset: chunk.offset,
            });
        }
        let end = open.received + chunk.data.len() as u64;
        if end > open.total {
            return Err(TransferError::SizeMismatch {
                expected: open.total,
                actual: end,
            });
        }

        open.file.write_all(&chunk.data).await?;
        open.received = end;
        self.store.update(&open.id, end);
        debug!(transfer_id = %open.id, offset = chunk.offset, len = chunk.data.len(), "chunk written");
        self.outbox.push(Frame::Ack(Ack {
            transfer_id: chunk.transfer_id,
            success: true,
            message: String::new(),
            bytes_received: end,
        }));

        if chunk.is_last {
            self.finalize().await?;
        }
        Ok(())
    }

    async fn open_file(&mut self, chunk: &ChunkFrame) -> Result<(), TransferError> {
        self.last_id = Some(chunk.transfer_id.clone());
        if chunk.transfer_id.is_empty() {
            return Err(TransferError::Protocol("chunk without transfer id".into()));
        }
        let id = TransferId::from(chunk.transfer_id.clone());
        let delivered = self
            .store
            .get(&id)
            .is_some_and(|d| d.status == TransferStatus::Completed);
        if delivered || self.finished.contains(&chunk.transfer_id) {
            return Err(TransferError::Protocol(format!(
                "transfer {id} already completed"
            )));
        }

        let path = self.validator.validate(&chunk.dest_path)?.into_path_buf();
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(TransferError::InvalidPath(format!(
                "{} is a directory",
                chunk.dest_path
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;

        self.store.start(
            &id,
            chunk.dest_path.clone(),
            path.display().to_string(),
            chunk.total_size,
        );
        info!(
            transfer_id = %id,
            dest = %path.display(),
            total = chunk.total_size,
            "receiving file"
        );
        self.open = Some(OpenFile {
            id,
            path,
            file: BufWriter::with_capacity(FILE_BUFFER_SIZE, file),
            total: chunk.total_size,
            received: 0,
        });
        self.phase = ReceiverPhase::Receiving;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), TransferError> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        self.phase = ReceiverPhase::Finalizing;
        if let Err(e) = settle(&mut open).await {
            // Keep the file so abort can clean it up.
            self.open = Some(open);
            return Err(e);
        }

        self.store.complete(&open.id);
        self.finished.insert(open.id.to_string());
        self.summary.files_completed += 1;
        self.summary.bytes_received += open.received;
        info!(transfer_id = %open.id, bytes = open.received, "file received");
        self.outbox.push(Frame::Terminal(Terminal {
            transfer_id: open.id.to_string(),
            code: ErrorCode::Ok,
            message: "transfer completed".into(),
            final_bytes: open.received,
        }));
        self.phase = ReceiverPhase::Completed;
        Ok(())
    }
}

/// Flushes the file to disk and checks the byte count.
async fn settle(open: &mut OpenFile) -> Result<(), TransferError> {
    open.file.flush().await?;
    open.file.get_ref().sync_all().await?;
    if open.received != open.total {
        return Err(TransferError::SizeMismatch {
            expected: open.total,
            actual: open.received,
        });
    }
    Ok(())
}

/// Serves transfer streams against one root and progress store.
#[derive(Clone)]
pub struct Receiver {
    validator: Arc<PathValidator>,
    store: Arc<ProgressStore>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Receiver {
    pub fn new(validator: Arc<PathValidator>, store: Arc<ProgressStore>) -> Self {
        Self {
            validator,
            store,
            idle_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts a stream when no frame arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Aborts served streams, removing partial output, once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn validator(&self) -> &Arc<PathValidator> {
        &self.validator
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn machine(&self) -> ReceiverMachine {
        ReceiverMachine::new(Arc::clone(&self.validator), Arc::clone(&self.store))
    }

    /// Serves one stream until end of input or the first failure.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<StreamSummary, TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let first = self.next_frame(&mut reader).await;
        match first {
            Ok(Some(frame)) => self.serve_after(frame, reader, writer).await,
            Ok(None) => Ok(StreamSummary::default()),
            Err(e) => {
                let mut machine = self.machine();
                let mut writer = writer;
                reject(&mut machine, &mut writer, &e).await;
                Err(e)
            }
        }
    }

    /// Serves a stream whose first frame the caller already read.
    pub async fn serve_after<R, W>(
        &self,
        first: Frame,
        mut reader: R,
        mut writer: W,
    ) -> Result<StreamSummary, TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut machine = self.machine();
        let mut pending = Some(first);
        loop {
            let (step, ended) = match pending.take() {
                Some(frame) => (machine.handle(frame).await, false),
                None => match self.next_frame(&mut reader).await {
                    Ok(Some(frame)) => (machine.handle(frame).await, false),
                    Ok(None) => (machine.finish().await, true),
                    Err(e) => (Err(e), false),
                },
            };

            let sent = send_replies(&mut machine, &mut writer).await;
            let step = step.and(sent);
            if let Err(e) = step {
                reject(&mut machine, &mut writer, &e).await;
                return Err(e);
            }
            if ended {
                let summary = machine.summary();
                debug!(
                    files = summary.files_completed,
                    bytes = summary.bytes_received,
                    "transfer stream closed"
                );
                return Ok(summary);
            }
        }
    }

    async fn next_frame<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Option<Frame>, TransferError> {
        let read = async {
            let frame = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, read_frame(reader))
                    .await
                    .map_err(|_| TransferError::Timeout)??,
                None => read_frame(reader).await?,
            };
            Ok(frame)
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            frame = read => frame,
        }
    }
}

async fn send_replies<W: AsyncWrite + Unpin>(
    machine: &mut ReceiverMachine,
    writer: &mut W,
) -> Result<(), TransferError> {
    for reply in machine.take_replies() {
        write_frame(writer, &reply).await?;
    }
    Ok(())
}

/// Best-effort terminal frame, then close our half of the stream.
async fn reject<W: AsyncWrite + Unpin>(
    machine: &mut ReceiverMachine,
    writer: &mut W,
    err: &TransferError,
) {
    let terminal = machine.abort(err).await;
    if let Err(e) = write_frame(writer, &terminal).await {
        debug!(error = %e, "could not deliver terminal frame");
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ProgressStore>, ReceiverMachine) {
        let dir = TempDir::new().unwrap();
        let validator = Arc::new(PathValidator::new(dir.path()).unwrap());
        let store = Arc::new(ProgressStore::new());
        let machine = ReceiverMachine::new(validator, Arc::clone(&store));
        (dir, store, machine)
    }

    fn chunk(id: &str, dest: &str, total: u64, offset: u64, data: &[u8], last: bool) -> Frame {
        Frame::Chunk(ChunkFrame {
            transfer_id: id.into(),
            dest_path: dest.into(),
            total_size: total,
            offset,
            digest: checksum_bytes(data),
            is_last: last,
            data: data.to_vec(),
        })
    }

    fn terminal(frame: &Frame) -> &Terminal {
        match frame {
            Frame::Terminal(t) => t,
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn receives_file_in_order() {
        let (dir, store, mut m) = setup();
        m.handle(chunk("t1", "out/a.bin", 6, 0, b"abc", false))
            .await
            .unwrap();
        assert_eq!(m.phase(), ReceiverPhase::Receiving);
        m.handle(chunk("t1", "out/a.bin", 6, 3, b"def", true))
            .await
            .unwrap();

        let replies = m.take_replies();
        assert_eq!(replies.len(), 3);
        assert!(matches!(&replies[0], Frame::Ack(a) if a.bytes_received == 3));
        assert!(matches!(&replies[1], Frame::Ack(a) if a.bytes_received == 6));
        let t = terminal(&replies[2]);
        assert!(t.success());
        assert_eq!(t.final_bytes, 6);

        assert_eq!(m.phase(), ReceiverPhase::Completed);
        assert_eq!(std::fs::read(dir.path().join("out/a.bin")).unwrap(), b"abcdef");
        let d = store.get(&TransferId::from("t1")).unwrap();
        assert_eq!(d.status, TransferStatus::Completed);
        assert_eq!(d.source, "out/a.bin");
    }

    #[tokio::test]
    async fn repeated_id_after_completion_keeps_delivered_file() {
        let (dir, store, mut m) = setup();
        m.handle(chunk("t1", "a.bin", 6, 0, b"abcdef", true))
            .await
            .unwrap();
        m.take_replies();

        let err = m
            .handle(chunk("t1", "a.bin", 6, 3, b"def", true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        let t = m.abort(&err).await;
        assert_eq!(terminal(&t).code, ErrorCode::InvalidArgument);

        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abcdef");
        assert_eq!(
            store.get(&TransferId::from("t1")).unwrap().status,
            TransferStatus::Completed
        );
    }

    #[tokio::test]
    async fn id_completed_on_another_stream_is_refused() {
        let (dir, store, mut first) = setup();
        first
            .handle(chunk("t1", "a.bin", 3, 0, b"abc", true))
            .await
            .unwrap();

        let validator = Arc::new(PathValidator::new(dir.path()).unwrap());
        let mut second = ReceiverMachine::new(validator, Arc::clone(&store));
        let err = second
            .handle(chunk("t1", "a.bin", 3, 0, b"xyz", true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn cancel_mid_file_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ProgressStore::new());
        let cancel = CancellationToken::new();
        let receiver = Receiver::new(
            Arc::new(PathValidator::new(dir.path()).unwrap()),
            Arc::clone(&store),
        )
        .with_cancel(cancel.clone());
        let (client, server) = tokio::io::duplex(4096);
        let (server_rd, server_wr) = tokio::io::split(server);
        let task = tokio::spawn(async move { receiver.serve(server_rd, server_wr).await });

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        write_frame(&mut client_wr, &chunk("t1", "part.bin", 10, 0, b"abc", false))
            .await
            .unwrap();
        let ack = read_frame(&mut client_rd).await.unwrap().unwrap();
        assert!(matches!(ack, Frame::Ack(_)));
        assert!(dir.path().join("part.bin").exists());

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TransferError::Cancelled)));
        let reply = read_frame(&mut client_rd).await.unwrap().unwrap();
        assert!(!terminal(&reply).success());
        assert!(!dir.path().join("part.bin").exists());
        assert_eq!(
            store.get(&TransferId::from("t1")).unwrap().status,
            TransferStatus::Error
        );
    }

    #[tokio::test]
    async fn first_frame_must_be_chunk() {
        let (_dir, _store, mut m) = setup();
        let err = m
            .handle(Frame::Delete { path: "a".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn later_non_chunk_frame_is_rejected() {
        let (_dir, _store, mut m) = setup();
        m.handle(chunk("t1", "a", 4, 0, b"ab", false)).await.unwrap();
        let err = m
            .handle(Frame::Ack(Ack {
                transfer_id: "t1".into(),
                success: true,
                message: String::new(),
                bytes_received: 0,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn corrupt_chunk_aborts_and_removes_partial() {
        let (dir, store, mut m) = setup();
        m.handle(chunk("t1", "a.bin", 6, 0, b"abc", false))
            .await
            .unwrap();
        let mut bad = chunk("t1", "a.bin", 6, 3, b"def", true);
        if let Frame::Chunk(c) = &mut bad {
            c.data[0] ^= 0xff;
        }
        let err = m.handle(bad).await.unwrap_err();
        assert!(matches!(err, TransferError::IntegrityMismatch { offset: 3 }));

        let t = m.abort(&err).await;
        let t = terminal(&t);
        assert_eq!(t.code, ErrorCode::DataLoss);
        assert_eq!(t.transfer_id, "t1");
        assert_eq!(t.final_bytes, 3);
        assert!(!dir.path().join("a.bin").exists());
        assert_eq!(m.phase(), ReceiverPhase::Failed);
        assert_eq!(
            store.get(&TransferId::from("t1")).unwrap().status,
            TransferStatus::Error
        );
    }

    #[tokio::test]
    async fn gap_is_out_of_order() {
        let (_dir, _store, mut m) = setup();
        m.handle(chunk("t1", "a", 10, 0, b"ab", false)).await.unwrap();
        let err = m
            .handle(chunk("t1", "a", 10, 4, b"cd", false))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::OutOfOrder {
                expected: 2,
                offset: 4
            }
        ));
        assert_eq!(err.code(), ErrorCode::DataLoss);
    }

    #[tokio::test]
    async fn short_file_is_size_mismatch() {
        let (dir, _store, mut m) = setup();
        let err = m
            .handle(chunk("t1", "a", 10, 0, b"abcd", true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 10,
                actual: 4
            }
        ));
        let t = m.abort(&err).await;
        assert_eq!(terminal(&t).code, ErrorCode::DataLoss);
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn overrun_is_size_mismatch() {
        let (_dir, _store, mut m) = setup();
        let err = m
            .handle(chunk("t1", "a", 2, 0, b"abcd", true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn changing_declared_size_is_protocol_error() {
        let (_dir, _store, mut m) = setup();
        m.handle(chunk("t1", "a", 4, 0, b"ab", false)).await.unwrap();
        let err = m
            .handle(chunk("t1", "a", 8, 2, b"cd", false))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn traversal_destination_is_rejected_before_create() {
        let (_dir, store, mut m) = setup();
        let err = m
            .handle(chunk("t1", "../escape.bin", 1, 0, b"x", true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Traversal(_)));
        let t = m.abort(&err).await;
        let t = terminal(&t);
        assert_eq!(t.code, ErrorCode::InvalidArgument);
        assert_eq!(t.transfer_id, "t1");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn directory_destination_is_rejected() {
        let (dir, _store, mut m) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let err = m
            .handle(chunk("t1", "sub", 1, 0, b"x", true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert!(dir.path().join("sub").is_dir());
    }

    #[tokio::test]
    async fn new_id_finalizes_previous_file() {
        let (dir, store, mut m) = setup();
        m.handle(chunk("t1", "one", 2, 0, b"ab", false)).await.unwrap();
        m.handle(chunk("t2", "two", 1, 0, b"z", true)).await.unwrap();

        let replies = m.take_replies();
        let terminals: Vec<_> = replies
            .iter()
            .filter_map(|f| match f {
                Frame::Terminal(t) => Some(t.transfer_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(terminals, vec!["t1", "t2"]);
        assert_eq!(std::fs::read(dir.path().join("one")).unwrap(), b"ab");
        assert_eq!(std::fs::read(dir.path().join("two")).unwrap(), b"z");
        assert_eq!(m.summary().files_completed, 2);
        assert_eq!(store.list().len(), 2);
    }

    #[tokio::test]
    async fn end_of_input_finalizes_open_file() {
        let (dir, _store, mut m) = setup();
        m.handle(chunk("t1", "a", 3, 0, b"abc", false)).await.unwrap();
        m.finish().await.unwrap();
        let replies = m.take_replies();
        assert!(terminal(replies.last().unwrap()).success());
        assert_eq!(std::fs::read(dir.path().join("a")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn empty_file_completes() {
        let (dir, store, mut m) = setup();
        m.handle(chunk("t1", "empty.txt", 0, 0, b"", true))
            .await
            .unwrap();
        let replies = m.take_replies();
        let t = terminal(replies.last().unwrap());
        assert!(t.success());
        assert_eq!(t.final_bytes, 0);
        assert_eq!(std::fs::metadata(dir.path().join("empty.txt")).unwrap().len(), 0);
        assert_eq!(
            store.get(&TransferId::from("t1")).unwrap().percent_complete(),
            100.0
        );
    }

    #[tokio::test]
    async fn serve_reports_protocol_violation_on_stream() {
        let dir = TempDir::new().unwrap();
        let receiver = Receiver::new(
            Arc::new(PathValidator::new(dir.path()).unwrap()),
            Arc::new(ProgressStore::new()),
        );
        let (client, server) = tokio::io::duplex(4096);
        let (server_rd, server_wr) = tokio::io::split(server);
        let task = tokio::spawn(async move { receiver.serve(server_rd, server_wr).await });

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        write_frame(
            &mut client_wr,
            &Frame::Terminal(Terminal {
                transfer_id: "x".into(),
                code: ErrorCode::Ok,
                message: String::new(),
                final_bytes: 0,
            }),
        )
        .await
        .unwrap();

        let reply = read_frame(&mut client_rd).await.unwrap().unwrap();
        assert_eq!(terminal(&reply).code, ErrorCode::InvalidArgument);
        assert!(matches!(
            task.await.unwrap(),
            Err(TransferError::Protocol(_))
        ));
    }
}
