//! Sending side of a file transfer.
//!
//! The sender owns the writing half of a stream for the duration of one
//! file: it slices the file into chunks, writes them as [`Frame::Chunk`]
//! frames and reads back acknowledgments until the receiver's terminal
//! outcome arrives.

use std::sync::Arc;
use std::time::Duration;

use peerxfer_protocol::{
    Ack, ChunkFrame, ErrorCode, Frame, ProgressEvent, Terminal, read_frame, write_frame,
};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::ChunkReader;
use crate::progress::ProgressStore;
use crate::types::{Chunk, FlowControl, TransferId, TransferOutcome};
use crate::validation::ValidatedPath;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Default wait for any single reply frame.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the receiver's reason after our write failed.
const ABORT_REASON_TIMEOUT: Duration = Duration::from_millis(500);

/// Buffer size for the stream halves.
const STREAM_BUFFER_SIZE: usize = 256 * 1024;

/// Tunables for one [`Sender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub chunk_size: usize,
    pub flow: FlowControl,
    /// Limit on waiting for each reply frame; `None` waits forever.
    pub io_timeout: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flow: FlowControl::default(),
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }
}

type FrameReader<S> = BufReader<ReadHalf<S>>;
type FrameWriter<S> = BufWriter<WriteHalf<S>>;

/// Streams one file at a time to a receiver.
pub struct Sender {
    store: Arc<ProgressStore>,
    options: SendOptions,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl Sender {
    pub fn new(store: Arc<ProgressStore>, options: SendOptions) -> Self {
        Self {
            store,
            options,
            progress_tx: None,
        }
    }

    /// Emits a `progress` event after each chunk (non-blocking; dropped when
    /// the channel is full).
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    /// Sends `source` to `dest` on the receiver over `stream`.
    ///
    /// The transfer is registered in the store under a fresh id and marked
    /// completed or failed before this returns. Nothing is retried here.
    pub async fn send<S>(
        &self,
        source: &ValidatedPath,
        dest: &str,
        stream: S,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = ChunkReader::open(source.as_path(), self.options.chunk_size).await?;
        let total = reader.file_size();
        let id = TransferId::generate();
        self.store.start(&id, source.to_string(), dest, total);
        info!(
            transfer_id = %id,
            source = %source,
            dest,
            total,
            flow = ?self.options.flow,
            "sending file"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.run(&id, dest, &mut reader, stream) => r,
        };

        match result {
            Ok(terminal) => {
                self.store.update(&id, terminal.final_bytes);
                self.store.complete(&id);
                info!(transfer_id = %id, bytes = terminal.final_bytes, "file sent");
                Ok(TransferOutcome {
                    transfer_id: id,
                    source: source.as_path().to_path_buf(),
                    destination: dest.to_string(),
                    success: true,
                    message: terminal.message,
                    bytes: terminal.final_bytes,
                })
            }
            Err(e) => {
                warn!(transfer_id = %id, error = %e, "send failed");
                self.store.fail(&id, e.to_string());
                Err(e)
            }
        }
    }

    async fn run<S>(
        &self,
        id: &TransferId,
        dest: &str,
        reader: &mut ChunkReader,
        stream: S,
    ) -> Result<Terminal, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (rd, wr) = tokio::io::split(stream);
        let mut rd = BufReader::with_capacity(STREAM_BUFFER_SIZE, rd);
        let mut wr = BufWriter::with_capacity(STREAM_BUFFER_SIZE, wr);
        let total = reader.file_size();

        match self.options.flow {
            FlowControl::Lockstep => {
                self.lockstep(id, dest, total, reader, &mut rd, &mut wr)
                    .await
            }
            FlowControl::FreeRunning => {
                self.free_running(id, dest, total, reader, &mut rd, &mut wr)
                    .await
            }
        }
    }

    /// One chunk in flight: write, wait for its ack, repeat.
    async fn lockstep<S>(
        &self,
        id: &TransferId,
        dest: &str,
        total: u64,
        reader: &mut ChunkReader,
        rd: &mut FrameReader<S>,
        wr: &mut FrameWriter<S>,
    ) -> Result<Terminal, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        while let Some(chunk) = reader.next_chunk().await? {
            let is_last = chunk.is_last;
            if let Err(e) = self.write_chunk(id, dest, total, chunk, wr).await {
                return Err(self.abort_reason(id, rd, e).await);
            }
            match self.next_reply(rd).await? {
                Frame::Ack(ack) if ack.transfer_id == id.as_str() => self.on_ack(id, &ack)?,
                Frame::Terminal(t) if t.transfer_id == id.as_str() => {
                    return Err(early_terminal(t));
                }
                other => return Err(unexpected(id, &other)),
            }
            if is_last {
                break;
            }
        }
        self.await_terminal(id, rd).await
    }

    /// All chunks written back-to-back while acks are drained concurrently.
    async fn free_running<S>(
        &self,
        id: &TransferId,
        dest: &str,
        total: u64,
        reader: &mut ChunkReader,
        rd: &mut FrameReader<S>,
        wr: &mut FrameWriter<S>,
    ) -> Result<Terminal, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let write_err = {
            let writing = async {
                while let Some(chunk) = reader.next_chunk().await? {
                    let is_last = chunk.is_last;
                    self.write_chunk(id, dest, total, chunk, wr).await?;
                    if is_last {
                        break;
                    }
                }
                Ok::<(), TransferError>(())
            };
            tokio::pin!(writing);

            let reading = self.await_terminal(id, rd);
            tokio::pin!(reading);

            tokio::select! {
                written = &mut writing => match written {
                    Ok(()) => return reading.await,
                    Err(e) => e,
                },
                // The receiver may answer before we finish writing, e.g. to
                // abort on a bad chunk.
                outcome = &mut reading => return outcome,
            }
        };
        Err(self.abort_reason(id, rd, write_err).await)
    }

    async fn write_chunk<W: AsyncWrite + Unpin>(
        &self,
        id: &TransferId,
        dest: &str,
        total: u64,
        chunk: Chunk,
        wr: &mut W,
    ) -> Result<(), TransferError> {
        let end = chunk.offset + chunk.data.len() as u64;
        let frame = Frame::Chunk(ChunkFrame {
            transfer_id: id.to_string(),
            dest_path: dest.to_string(),
            total_size: total,
            offset: chunk.offset,
            digest: chunk.digest,
            is_last: chunk.is_last,
            data: chunk.data,
        });
        write_frame(wr, &frame).await?;
        self.store.update(id, end);
        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(ProgressEvent::progress(dest, end, total));
        }
        Ok(())
    }

    fn on_ack(&self, id: &TransferId, ack: &Ack) -> Result<(), TransferError> {
        if !ack.success {
            return Err(TransferError::Remote {
                code: ErrorCode::Internal,
                message: ack.message.clone(),
            });
        }
        debug!(transfer_id = %id, bytes = ack.bytes_received, "chunk acknowledged");
        Ok(())
    }

    /// Drains acks until the terminal frame for `id`.
    async fn await_terminal<R: AsyncRead + Unpin>(
        &self,
        id: &TransferId,
        rd: &mut R,
    ) -> Result<Terminal, TransferError> {
        loop {
            match self.next_reply(rd).await? {
                Frame::Ack(ack) if ack.transfer_id == id.as_str() => self.on_ack(id, &ack)?,
                Frame::Terminal(t) if t.transfer_id == id.as_str() => {
                    return if t.success() {
                        Ok(t)
                    } else {
                        Err(TransferError::Remote {
                            code: t.code,
                            message: t.message,
                        })
                    };
                }
                other => return Err(unexpected(id, &other)),
            }
        }
    }

    async fn next_reply<R: AsyncRead + Unpin>(&self, rd: &mut R) -> Result<Frame, TransferError> {
        let frame = match self.options.io_timeout {
            Some(limit) => tokio::time::timeout(limit, read_frame(rd))
                .await
                .map_err(|_| TransferError::Timeout)??,
            None => read_frame(rd).await?,
        };
        frame.ok_or_else(|| TransferError::Transport("stream closed before terminal response".into()))
    }

    /// After a failed write, the receiver has usually closed the stream
    /// with a terminal frame saying why; prefer that over the write error.
    async fn abort_reason<R: AsyncRead + Unpin>(
        &self,
        id: &TransferId,
        rd: &mut R,
        write_err: TransferError,
    ) -> TransferError {
        let reason = tokio::time::timeout(ABORT_REASON_TIMEOUT, async {
            loop {
                match read_frame(rd).await {
                    Ok(Some(Frame::Terminal(t))) if t.transfer_id == id.as_str() => {
                        return Some(t);
                    }
                    Ok(Some(_)) => continue,
                    _ => return None,
                }
            }
        })
        .await;
        match reason {
            Ok(Some(t)) if !t.success() => TransferError::Remote {
                code: t.code,
                message: t.message,
            },
            _ => write_err,
        }
    }
}

fn early_terminal(t: Terminal) -> TransferError {
    if t.success() {
        TransferError::Protocol("terminal success before last chunk".into())
    } else {
        TransferError::Remote {
            code: t.code,
            message: t.message,
        }
    }
}

fn unexpected(id: &TransferId, frame: &Frame) -> TransferError {
    TransferError::Protocol(format!(
        "unexpected {} frame while sending {id}",
        frame.name()
    ))
}
