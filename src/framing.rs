//! Length-prefixed framing: a 4-byte big-endian length prefix followed
//! by exactly that many bytes of protobuf-encoded payload (spec §4.1).
//!
//! Generic over `AsyncRead`/`AsyncWrite` rather than a concrete
//! `TcpStream` so the same functions exercise a real socket in
//! production and an in-memory `tokio::io::duplex` pair in tests.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PeerError, Result};
use crate::message::PeerMessage;

/// Serialize `msg`, write the 4-byte length prefix, then the payload.
pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, msg: PeerMessage) -> Result<()> {
    let payload = msg.encode_to_vec();
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| PeerError::Transport("encoded message exceeds u32::MAX bytes".into()))?;

    writer
        .write_u32(len)
        .await
        .map_err(|e| PeerError::Transport(e.to_string()))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| PeerError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| PeerError::Transport(e.to_string()))?;
    Ok(())
}

/// Read the 4-byte length prefix only. The only half of `receive` safe
/// to wrap in a cancelling timeout: until this resolves, no payload
/// bytes have been touched, so a caller that re-checks some condition
/// on timeout and calls this again sees a pristine prefix rather than
/// a stream desynced mid-frame.
pub async fn read_length_prefix<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    match reader.read_u32().await {
        Ok(len) => Ok(len),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(PeerError::ConnectionClosed),
        Err(e) => Err(PeerError::Transport(e.to_string())),
    }
}

/// Read exactly `len` bytes and decode them. Once a length prefix has
/// been read, this must run to completion uncancelled — dropping it
/// partway loses whatever body bytes it already consumed and leaves
/// the next read starting mid-payload.
pub(crate) async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, len: u32) -> Result<PeerMessage> {
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => PeerError::IncompleteMessage,
            _ => PeerError::Transport(e.to_string()),
        })?;

    PeerMessage::decode(&buf)
}

/// Read a 4-byte length prefix, then exactly that many bytes, and decode.
pub async fn receive<R: AsyncRead + Unpin>(reader: &mut R) -> Result<PeerMessage> {
    let len = read_length_prefix(reader).await?;
    read_body(reader, len).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::PeerId;

    #[tokio::test]
    async fn round_trip_is_bit_identical() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = PeerMessage::Message {
            from: PeerId(1),
            to: PeerId(2),
            text: "hello overlay".into(),
        };
        send(&mut a, msg.clone()).await.unwrap();
        let got = receive(&mut b).await.unwrap();
        assert_eq!(msg, got);
    }

    #[tokio::test]
    async fn truncated_after_length_prefix_is_incomplete() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_u32(100).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);
        let err = receive(&mut b).await.unwrap_err();
        assert!(matches!(err, PeerError::IncompleteMessage));
    }

    #[tokio::test]
    async fn closed_before_length_prefix_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = receive(&mut b).await.unwrap_err();
        assert!(matches!(err, PeerError::ConnectionClosed));
    }
}
