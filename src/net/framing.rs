//! Message framing for length-prefixed protocol
//!
//! Handles reading and writing framed packets over streams.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;
use crate::net::protocol::{decode, encode, DecodeError, EncodeError, Packet};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Read a length-prefixed message from a stream
///
/// Format: [4 bytes little-endian length][payload]
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::ConnectionClosed),
        Err(e) => Err(FramingError::Io(e)),
    }
}

/// Write a length-prefixed message to a stream
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> Result<(), FramingError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    let len_bytes = (data.len() as u32).to_le_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(data).await?;
    stream.flush().await?;

    Ok(())
}

/// Read and decode one packet. Returns the packet and its framed payload size
pub async fn read_packet<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<(Packet, usize), FramingError> {
    let data = read_message(stream).await?;
    let packet = decode(&data)?;
    Ok((packet, data.len()))
}

/// Encode and write one packet. Returns the payload size written
pub async fn write_packet<W: AsyncWrite + Unpin>(
    stream: &mut W,
    packet: &Packet,
) -> Result<usize, FramingError> {
    let data = encode(packet)?;
    write_message(stream, &data).await?;
    Ok(data.len())
}
