//! Async length-prefixed frame I/O.
//!
//! A frame is a 4-byte big-endian `u32` length followed by exactly that
//! many bytes of body. The reader resumes partial reads until the full
//! frame is available and reports clean EOF (connection closed between
//! frames) separately from a truncated frame.

use {
    crate::error::{Result, WireError},
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Read one frame body.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary. A length over
/// `max_len` or an EOF mid-frame is an error — the caller should drop
/// the connection.
pub async fn read_frame<R>(stream: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }

    let mut body = vec![0u8; len];
    match stream.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::TruncatedFrame),
        Err(e) => Err(e.into()),
    }
}

/// Write one pre-framed buffer (length prefix already included) and flush.
pub async fn write_all<W>(stream: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::message::WireMessage};

    #[tokio::test]
    async fn test_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let msg = WireMessage::PlRequest;
        let frame = msg.to_frame(1024).unwrap();
        write_all(&mut a, &frame).await.unwrap();

        let body = read_frame(&mut b, 1024).await.unwrap().unwrap();
        assert_eq!(WireMessage::from_json(&body).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        let (a, mut b) = tokio::io::duplex(256);
        drop(a);
        assert!(read_frame(&mut b, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(256);
        // Header promises 100 bytes, body delivers 3.
        write_all(&mut a, &100u32.to_be_bytes()).await.unwrap();
        write_all(&mut a, b"abc").await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b, 1024).await,
            Err(WireError::TruncatedFrame)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_all(&mut a, &(1_000_000u32).to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 65_536).await,
            Err(WireError::FrameTooLarge { .. })
        ));
    }
}
