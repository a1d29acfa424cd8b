//! Frame codec for worker pipes
//!
//! Frames look like this on the wire:
//! ```text
//! [magic: b"DDCM"][length: u32 little-endian][payload: postcard-encoded message]
//! ```
//!
//! Anything on the stream that does not start with the magic marker is handed
//! back as text, one line at a time, so stray output from a worker can be
//! forwarded to the host's logs instead of corrupting the protocol.

use crate::{DecodeError, EncodeError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Marker that starts every frame
pub const FRAME_MAGIC: [u8; 4] = *b"DDCM";

/// Marker plus length prefix
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted by either side
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Prefix a payload with the marker and its length
pub(crate) fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(EncodeError::TooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write an already-encoded frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// One item read off a worker pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Payload of a complete frame
    Frame(Vec<u8>),
    /// A line of text that was not part of any frame (line terminator stripped)
    Text(String),
}

/// Splits a byte stream into frames and text lines.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            eof: false,
        }
    }

    /// Read the next frame or text line. Returns `Ok(None)` on a clean EOF.
    pub async fn next(&mut self) -> Result<Option<Chunk>, DecodeError> {
        loop {
            if let Some(chunk) = self.take_buffered()? {
                return Ok(Some(chunk));
            }
            if self.eof {
                return Ok(None);
            }

            let mut tmp = [0u8; 16 * 1024];
            let n = self.reader.read(&mut tmp).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&tmp[..n]);
            }
        }
    }

    fn take_buffered(&mut self) -> Result<Option<Chunk>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let magic_at = find_magic(&self.buf);

        if magic_at == Some(0) {
            if self.buf.len() < HEADER_LEN {
                return self.incomplete();
            }
            let len = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                as usize;
            if len > MAX_FRAME_LEN {
                return Err(DecodeError::TooLarge(len));
            }
            if self.buf.len() < HEADER_LEN + len {
                return self.incomplete();
            }
            let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.buf.drain(..HEADER_LEN + len);
            return Ok(Some(Chunk::Frame(payload)));
        }

        // Text runs until the next marker (or the end of what we have)
        let limit = magic_at.unwrap_or(self.buf.len());
        if let Some(newline) = self.buf[..limit].iter().position(|&b| b == b'\n') {
            return Ok(Some(self.take_text(newline + 1)));
        }
        if magic_at.is_some() || self.eof {
            return Ok(Some(self.take_text(limit)));
        }

        // Partial line, wait for more
        Ok(None)
    }

    fn incomplete(&self) -> Result<Option<Chunk>, DecodeError> {
        if self.eof {
            Err(DecodeError::Truncated)
        } else {
            Ok(None)
        }
    }

    fn take_text(&mut self, len: usize) -> Chunk {
        let bytes: Vec<u8> = self.buf.drain(..len).collect();
        let text = String::from_utf8_lossy(&bytes);
        Chunk::Text(text.trim_end_matches(['\n', '\r']).to_string())
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_MAGIC.len())
        .position(|window| window == FRAME_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_interleaved_with_text() {
        let (mut tx, rx) = duplex(1024);

        let first = frame_payload(b"first").unwrap();
        let second = frame_payload(b"second").unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(b"hello from a worker\n");
        stream.extend_from_slice(&first);
        stream.extend_from_slice(b"no newline before a frame");
        stream.extend_from_slice(&second);
        stream.extend_from_slice(b"trailing\r\n");

        tokio::spawn(async move {
            // Dribble bytes out to exercise partial reads
            for piece in stream.chunks(3) {
                tx.write_all(piece).await.unwrap();
            }
        });

        let mut reader = FrameReader::new(rx);
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next().await.unwrap() {
            chunks.push(chunk);
        }

        assert_eq!(
            chunks,
            vec![
                Chunk::Text("hello from a worker".to_string()),
                Chunk::Frame(b"first".to_vec()),
                Chunk::Text("no newline before a frame".to_string()),
                Chunk::Frame(b"second".to_vec()),
                Chunk::Text("trailing".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut tx, rx) = duplex(1024);
        let frame = frame_payload(b"cut short").unwrap();
        tx.write_all(&frame[..frame.len() - 2]).await.unwrap();
        drop(tx);

        let mut reader = FrameReader::new(rx);
        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut tx, rx) = duplex(1024);
        let mut header = FRAME_MAGIC.to_vec();
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        tx.write_all(&header).await.unwrap();

        let mut reader = FrameReader::new(rx);
        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge(_)));
    }
}
