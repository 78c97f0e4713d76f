//! Transport primitives for the two channels
//!
//! The reliable channel is any ordered byte stream (a `TcpStream` in practice)
//! carrying `i32 length | payload` frames plus a single-byte ACK used by the
//! connect handshake. The unreliable channel is a `UdpSocket` where every
//! datagram is one complete message.

use crate::codec::{CodecError, LENGTH_PREFIX_SIZE};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

/// Byte sent to confirm the static handshake data was received.
pub const ACK_BYTE: u8 = 17;

/// Upper bound for a single reliable message.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Upper bound for a single datagram; messages must fit without fragmentation.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed length prefix {0}")]
    MalformedLength(i32),
    #[error("message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("expected ACK byte, received {0}")]
    AckMismatch(u8),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn map_eof(e: io::Error) -> TransportError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed
    } else {
        TransportError::Io(e)
    }
}

/// Writes all bytes, retrying partial writes until done.
pub async fn send_bytes<W: AsyncWrite + Unpin>(
    stream: &mut W,
    bytes: &[u8],
) -> Result<(), TransportError> {
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly `n` bytes however the stream fragments them.
pub async fn receive_bytes<R: AsyncRead + Unpin>(
    stream: &mut R,
    n: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.map_err(map_eof)?;
    Ok(buf)
}

/// Sends `payload` as one length-prefixed reliable message.
pub async fn send_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(TransportError::MessageTooLarge(
            payload.len(),
            MAX_MESSAGE_SIZE,
        ));
    }
    send_bytes(stream, &crate::codec::prepend_length(payload)).await
}

/// Receives one length-prefixed reliable message and returns its payload.
pub async fn receive_message<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<Vec<u8>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await.map_err(map_eof)?;
    let len = i32::from_le_bytes(prefix);

    if len < 0 {
        return Err(TransportError::MalformedLength(len));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(TransportError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    receive_bytes(stream, len).await
}

pub async fn send_ack<W: AsyncWrite + Unpin>(stream: &mut W) -> Result<(), TransportError> {
    send_bytes(stream, &[ACK_BYTE]).await
}

/// Waits for the single ACK byte; any other byte is a protocol violation.
pub async fn receive_ack<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(), TransportError> {
    let byte = receive_bytes(stream, 1).await?[0];
    if byte == ACK_BYTE {
        Ok(())
    } else {
        Err(TransportError::AckMismatch(byte))
    }
}

/// Waits until the peer closes its sending half. Any data still arriving is
/// drained and ignored.
pub async fn wait_for_close<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(), TransportError> {
    let mut scratch = [0u8; 64];
    loop {
        if stream.read(&mut scratch).await? == 0 {
            return Ok(());
        }
    }
}

/// Sends one self-contained datagram.
pub async fn send_datagram(
    socket: &UdpSocket,
    target: SocketAddr,
    message: &[u8],
) -> Result<(), TransportError> {
    check_datagram_size(message)?;
    socket.send_to(message, target).await?;
    Ok(())
}

/// Best-effort, non-blocking datagram send. A full socket buffer drops the
/// message, which later traffic supersedes.
pub fn try_send_datagram(
    socket: &UdpSocket,
    target: SocketAddr,
    message: &[u8],
) -> Result<(), TransportError> {
    check_datagram_size(message)?;
    socket.try_send_to(message, target)?;
    Ok(())
}

/// Receives one datagram of at most [`MAX_DATAGRAM_SIZE`] bytes.
pub async fn receive_datagram(socket: &UdpSocket) -> Result<(Vec<u8>, SocketAddr), TransportError> {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let (len, from) = socket.recv_from(&mut buf).await?;
    Ok((buf[..len].to_vec(), from))
}

pub fn check_datagram_size(message: &[u8]) -> Result<(), TransportError> {
    if message.len() > MAX_DATAGRAM_SIZE {
        Err(TransportError::MessageTooLarge(
            message.len(),
            MAX_DATAGRAM_SIZE,
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_message_survives_arbitrary_fragmentation() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let framed = crate::codec::prepend_length(&payload);

        // Deliver the prefix split across reads and the payload in odd chunks
        let mut mock = Builder::new()
            .read(&framed[..1])
            .read(&framed[1..3])
            .read(&framed[3..5])
            .read(&framed[5..300])
            .read(&framed[300..301])
            .read(&framed[301..])
            .build();

        let received = receive_message(&mut mock).await.unwrap();
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_send_message_writes_prefix_then_payload() {
        let mut mock = Builder::new().write(&[3, 0, 0, 0, 9, 8, 7]).build();
        send_message(&mut mock, &[9, 8, 7]).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_length_message() {
        let mut mock = Builder::new().read(&[0, 0, 0, 0]).build();
        assert!(receive_message(&mut mock).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_length_is_protocol_violation() {
        let mut mock = Builder::new().read(&(-5i32).to_le_bytes()).build();
        match receive_message(&mut mock).await {
            Err(TransportError::MalformedLength(-5)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let len = (MAX_MESSAGE_SIZE as i32) + 1;
        let mut mock = Builder::new().read(&len.to_le_bytes()).build();
        assert!(matches!(
            receive_message(&mut mock).await,
            Err(TransportError::MessageTooLarge(_, _))
        ));
    }

    #[tokio::test]
    async fn test_closed_mid_message() {
        let mut mock = Builder::new().read(&[10, 0, 0, 0, 1, 2]).build();
        assert!(matches!(
            receive_message(&mut mock).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_ack_handshake() {
        let mut writer = Builder::new().write(&[ACK_BYTE]).build();
        send_ack(&mut writer).await.unwrap();

        let mut reader = Builder::new().read(&[ACK_BYTE]).build();
        receive_ack(&mut reader).await.unwrap();

        let mut wrong = Builder::new().read(&[42]).build();
        assert!(matches!(
            receive_ack(&mut wrong).await,
            Err(TransportError::AckMismatch(42))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_close_drains_until_eof() {
        let mut mock = Builder::new().read(&[1, 2, 3]).build();
        wait_for_close(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        send_datagram(&sender, target, &[1, 2, 3]).await.unwrap();
        let (bytes, from) = receive_datagram(&receiver).await.unwrap();

        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[test]
    fn test_datagram_size_limit() {
        assert!(check_datagram_size(&[0u8; MAX_DATAGRAM_SIZE]).is_ok());
        assert!(check_datagram_size(&[0u8; MAX_DATAGRAM_SIZE + 1]).is_err());
    }
}
