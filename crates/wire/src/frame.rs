//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][compiled payload]
//! Maximum frame size: 1MB (sanity limit)

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, Result};
use crate::payload::Payload;

/// Maximum allowed frame size (1MB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Read a length-prefixed frame from a stream and decode its payload
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Payload> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::ConnectionClosed
        } else {
            CodecError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);

    // Sanity check
    if len == 0 {
        return Err(CodecError::Frame("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::Frame(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    // Read payload
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::ConnectionClosed
        } else {
            CodecError::Io(e)
        }
    })?;

    Payload::decode(&payload)
}

/// Compile a payload and write it as a length-prefixed frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &Payload) -> Result<()> {
    let bytes = payload.compile()?;
    write_frame_bytes(writer, &bytes).await
}

/// Write an already-compiled payload as a length-prefixed frame
pub async fn write_frame_bytes<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = bytes.len() as u32;
    if len == 0 {
        return Err(CodecError::Frame("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::Frame(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    // Write length prefix
    writer.write_all(&len.to_be_bytes()).await?;

    // Write payload
    writer.write_all(bytes).await?;

    // Flush to ensure delivery
    writer.flush().await?;

    Ok(())
}
