//! Frame-at-a-time reading of mongo wire messages.

use crate::error::ServerError;
use bytes::BytesMut;
use mongotap_protocol::{ProtocolError, HEADER_LEN, MAX_MESSAGE_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads exactly one wire message at a time off a client stream. The scratch
/// buffer is reused across frames of the same connection.
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Reads the next message: first the 16-byte header, then
    /// `messageLength - 16` trailing bytes.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly before any header
    /// byte arrives, so callers can tell a client disconnect from a
    /// truncated message. Every error terminates the connection.
    pub async fn next_frame<R>(&mut self, stream: &mut R) -> Result<Option<&[u8]>, ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = stream.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    // Clean disconnect between messages.
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedHeader(filled).into());
            }
            filled += n;
        }

        let message_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
        if message_length < HEADER_LEN as i32 {
            return Err(ProtocolError::MessageTooShort(message_length).into());
        }
        if message_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: message_length,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        self.buf.clear();
        self.buf.resize(message_length as usize, 0);
        self.buf[..HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut self.buf[HEADER_LEN..]).await?;

        Ok(Some(&self.buf))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(request_id: i32, opcode: i32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_LEN + payload.len()) as i32).to_le_bytes());
        out.extend_from_slice(&request_id.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_reads_single_frame() {
        let data = frame_bytes(1, 2004, b"payload");
        let mut stream = &data[..];

        let mut framer = Framer::new();
        let frame = framer.next_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(frame, &data[..]);
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames_reusing_buffer() {
        let mut data = frame_bytes(1, 2004, b"first");
        data.extend_from_slice(&frame_bytes(2, 2013, b"second payload"));
        let mut stream = &data[..];

        let mut framer = Framer::new();
        let first = framer.next_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(first.len(), HEADER_LEN + 5);
        let second = framer.next_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(second.len(), HEADER_LEN + 14);
        assert_eq!(&second[HEADER_LEN..], b"second payload");
    }

    #[tokio::test]
    async fn test_clean_eof_reports_none() {
        let mut stream: &[u8] = &[];
        let mut framer = Framer::new();
        assert!(framer.next_frame(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_header_is_an_error() {
        let data = [0x20u8, 0x00, 0x00];
        let mut stream = &data[..];
        let mut framer = Framer::new();
        let err = framer.next_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::TruncatedHeader(3))
        ));
    }

    #[tokio::test]
    async fn test_message_length_below_header_size() {
        let mut data = frame_bytes(1, 2004, b"");
        data[0..4].copy_from_slice(&4i32.to_le_bytes());
        let mut stream = &data[..];

        let mut framer = Framer::new();
        let err = framer.next_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::MessageTooShort(4))
        ));
    }

    #[tokio::test]
    async fn test_message_length_above_limit() {
        let mut data = frame_bytes(1, 2004, b"");
        data[0..4].copy_from_slice(&(MAX_MESSAGE_SIZE + 1).to_le_bytes());
        let mut stream = &data[..];

        let mut framer = Framer::new();
        let err = framer.next_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let data = frame_bytes(1, 2004, b"payload");
        let mut stream = &data[..data.len() - 2];

        let mut framer = Framer::new();
        assert!(framer.next_frame(&mut stream).await.is_err());
    }

    #[tokio::test]
    async fn test_header_only_frame() {
        let data = frame_bytes(7, 9999, b"");
        let mut stream = &data[..];

        let mut framer = Framer::new();
        let frame = framer.next_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
    }
}
