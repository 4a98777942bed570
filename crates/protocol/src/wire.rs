//! Binary encoding of [`Frame`]s.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [1 byte: tag]
//!   [4 bytes BE: body_len]
//!   [body_len bytes: body]
//!
//! Strings are [2 bytes BE: len][len bytes UTF-8].
//! Byte payloads are [4 bytes BE: len][len bytes].
//!
//! CHUNK (1):    id, dest_path, [8 BE total_size], [8 BE offset], digest,
//!               [1 is_last], payload
//! ACK (2):      id, [1 success], message, [8 BE bytes_received]
//! TERMINAL (3): id, [1 code], message, [8 BE final_bytes]
//! DELETE (4):   path
//! DELETE_RESULT (5): [1 success], message
//! ```
//!
//! A clean end-of-stream before a tag byte reads as `None`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{Ack, ChunkFrame, DeleteResult, ErrorCode, Frame, Terminal};
use crate::{MAX_FRAME_SIZE, ProtocolError};

/// Encodes `frame`, writes it and flushes the writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ProtocolError> {
    let mut body = Vec::with_capacity(frame.size_hint());
    encode_body(&mut body, frame).await?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    writer.write_u8(frame.tag()).await?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame.
///
/// Returns `None` if the peer closed the stream on a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, ProtocolError> {
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let body_len = reader.read_u32().await? as usize;
    if body_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body_len));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;

    decode_body(tag, &body).await.map(Some)
}

async fn encode_body(buf: &mut Vec<u8>, frame: &Frame) -> Result<(), ProtocolError> {
    match frame {
        Frame::Chunk(c) => {
            put_str(buf, &c.transfer_id).await?;
            put_str(buf, &c.dest_path).await?;
            buf.write_u64(c.total_size).await?;
            buf.write_u64(c.offset).await?;
            put_str(buf, &c.digest).await?;
            buf.write_u8(c.is_last as u8).await?;
            put_bytes(buf, &c.data).await?;
        }
        Frame::Ack(a) => {
            put_str(buf, &a.transfer_id).await?;
            buf.write_u8(a.success as u8).await?;
            put_str(buf, &a.message).await?;
            buf.write_u64(a.bytes_received).await?;
        }
        Frame::Terminal(t) => {
            put_str(buf, &t.transfer_id).await?;
            buf.write_u8(t.code as u8).await?;
            put_str(buf, &t.message).await?;
            buf.write_u64(t.final_bytes).await?;
        }
        Frame::Delete { path } => {
            put_str(buf, path).await?;
        }
        Frame::DeleteResult(r) => {
            buf.write_u8(r.success as u8).await?;
            put_str(buf, &r.message).await?;
        }
    }
    Ok(())
}

async fn decode_body(tag: u8, body: &[u8]) -> Result<Frame, ProtocolError> {
    let mut cursor = body;
    let frame = match tag {
        Frame::TAG_CHUNK => Frame::Chunk(ChunkFrame {
            transfer_id: get_str(&mut cursor).await?,
            dest_path: get_str(&mut cursor).await?,
            total_size: cursor.read_u64().await.map_err(truncated)?,
            offset: cursor.read_u64().await.map_err(truncated)?,
            digest: get_str(&mut cursor).await?,
            is_last: get_bool(&mut cursor).await?,
            data: get_bytes(&mut cursor).await?,
        }),
        Frame::TAG_ACK => Frame::Ack(Ack {
            transfer_id: get_str(&mut cursor).await?,
            success: get_bool(&mut cursor).await?,
            message: get_str(&mut cursor).await?,
            bytes_received: cursor.read_u64().await.map_err(truncated)?,
        }),
        Frame::TAG_TERMINAL => {
            let transfer_id = get_str(&mut cursor).await?;
            let raw = cursor.read_u8().await.map_err(truncated)?;
            let code = ErrorCode::from_u8(raw)
                .ok_or_else(|| ProtocolError::Malformed(format!("unknown error code {raw}")))?;
            Frame::Terminal(Terminal {
                transfer_id,
                code,
                message: get_str(&mut cursor).await?,
                final_bytes: cursor.read_u64().await.map_err(truncated)?,
            })
        }
        Frame::TAG_DELETE => Frame::Delete {
            path: get_str(&mut cursor).await?,
        },
        Frame::TAG_DELETE_RESULT => Frame::DeleteResult(DeleteResult {
            success: get_bool(&mut cursor).await?,
            message: get_str(&mut cursor).await?,
        }),
        other => return Err(ProtocolError::UnknownTag(other)),
    };

    if !cursor.is_empty() {
        return Err(ProtocolError::Malformed(format!(
            "{} trailing bytes after {} frame",
            cursor.len(),
            frame.name()
        )));
    }
    Ok(frame)
}

fn truncated(e: io::Error) -> ProtocolError {
    ProtocolError::Malformed(format!("truncated body: {e}"))
}

async fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let len = s.len();
    if len > u16::MAX as usize {
        return Err(ProtocolError::Malformed(format!(
            "string too long: {len} bytes (max {})",
            u16::MAX
        )));
    }
    buf.write_u16(len as u16).await?;
    buf.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    buf.write_u32(data.len() as u32).await?;
    buf.write_all(data).await?;
    Ok(())
}

async fn get_str(cursor: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = cursor.read_u16().await.map_err(truncated)? as usize;
    let mut raw = vec![0u8; len];
    cursor.read_exact(&mut raw).await.map_err(truncated)?;
    String::from_utf8(raw).map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {e}")))
}

async fn get_bytes(cursor: &mut &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = cursor.read_u32().await.map_err(truncated)? as usize;
    if len > cursor.len() {
        return Err(ProtocolError::Malformed(format!(
            "payload length {len} exceeds remaining {} bytes",
            cursor.len()
        )));
    }
    let mut data = vec![0u8; len];
    cursor.read_exact(&mut data).await.map_err(truncated)?;
    Ok(data)
}

async fn get_bool(cursor: &mut &[u8]) -> Result<bool, ProtocolError> {
    match cursor.read_u8().await.map_err(truncated)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::Malformed(format!("invalid bool byte {other}"))),
    }
}
