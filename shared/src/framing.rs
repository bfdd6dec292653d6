//! Length-prefixed framing for envelopes on a byte stream.
//!
//! Format: `[4 bytes little-endian length][bincode(Envelope)]`.

use crate::{Envelope, ProtocolError};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Reads one frame. A clean EOF before the length prefix is `ConnectionClosed`.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::ConnectionClosed),
        Err(e) => Err(FramingError::Io(e)),
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> Result<(), FramingError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge(data.len(), MAX_FRAME_SIZE));
    }

    stream.write_all(&(data.len() as u32).to_le_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_envelope<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Envelope, FramingError> {
    let frame = read_frame(stream).await?;
    Ok(Envelope::from_bytes(&frame)?)
}

pub async fn write_envelope<W: AsyncWrite + Unpin>(
    stream: &mut W,
    envelope: &Envelope,
) -> Result<(), FramingError> {
    let data = envelope.to_bytes()?;
    write_frame(stream, &data).await
}
