//! Length-prefixed frame reading and building.
//!
//! A frame is a big-endian `i32` payload length followed by exactly that
//! many bytes. [`FrameReader`] performs two exact-size reads per frame and
//! refuses negative or oversized lengths before allocating anything, so a
//! corrupt or hostile prefix cannot request unbounded memory.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::transport::map_io_error;

/// Size of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reads one frame at a time from an underlying byte stream.
///
/// Stream errors propagate untransformed; in particular a peer close shows
/// up as `ConnectionClosed`, which receive loops treat as normal
/// termination.
///
/// # Example
///
/// ```
/// use wiremux::FrameReader;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let wire: &[u8] = &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
/// let mut reader = FrameReader::new(wire);
/// assert_eq!(&reader.read().await.unwrap()[..], b"hello");
/// # }
/// ```
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default frame-size cap.
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap a stream with an explicit frame-size cap.
    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Read the next frame's payload.
    pub async fn read(&mut self) -> Result<Bytes> {
        let mut prefix = [0u8; LEN_PREFIX_SIZE];
        self.inner
            .read_exact(&mut prefix)
            .await
            .map_err(map_io_error)?;

        let length = i32::from_be_bytes(prefix);
        if length < 0 {
            return Err(ErrorInfo::new(ErrorCode::Parameter)
                .with_message("negative frame length")
                .add_pair("frame_length", length));
        }
        let length = length as usize;
        if length > self.max_frame_size {
            return Err(ErrorInfo::new(ErrorCode::Parameter)
                .with_message("frame length exceeds maximum")
                .add_pair("frame_length", length)
                .add_pair("max_frame_size", self.max_frame_size));
        }

        let mut payload = BytesMut::zeroed(length);
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(map_io_error)?;
        Ok(payload.freeze())
    }

    /// Unwrap back to the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Encode the length prefix for a payload of `len` bytes.
pub fn frame_prefix(len: usize) -> Result<[u8; LEN_PREFIX_SIZE]> {
    let length = i32::try_from(len).map_err(|_| {
        ErrorInfo::new(ErrorCode::Parameter)
            .with_message("payload too large for frame length prefix")
            .add_pair("payload_length", len)
    })?;
    Ok(length.to_be_bytes())
}

/// Build a complete frame as one contiguous buffer.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let prefix = frame_prefix(payload.len())?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reads_hello_frame() {
        let wire: &[u8] = &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
        let mut reader = FrameReader::new(wire);
        let payload = reader.read().await.unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut wire = build_frame(b"first").unwrap();
        wire.extend(build_frame(b"second").unwrap());
        let mut reader = FrameReader::new(&wire[..]);

        assert_eq!(&reader.read().await.unwrap()[..], b"first");
        assert_eq!(&reader.read().await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let wire = build_frame(b"").unwrap();
        let mut reader = FrameReader::new(&wire[..]);
        assert!(reader.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fragmented_delivery() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let frame = build_frame(b"split me").unwrap();

        let writer = tokio::spawn(async move {
            // Prefix and payload arrive in separate writes.
            tx.write_all(&frame[..2]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            tx.write_all(&frame[2..6]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            tx.write_all(&frame[6..]).await.unwrap();
        });

        let mut reader = FrameReader::new(rx);
        assert_eq!(&reader.read().await.unwrap()[..], b"split me");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_length_rejected() {
        let wire: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFB];
        let mut reader = FrameReader::new(wire);
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
        assert_eq!(err.values("frame_length").collect::<Vec<_>>(), vec!["-5"]);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_allocation() {
        // Claims a 1 GiB payload; the reader must refuse based on the prefix
        // alone, with only these four bytes available.
        let wire: &[u8] = &[0x40, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::with_max_frame_size(wire, 1024);
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
        assert_eq!(err.values("max_frame_size").collect::<Vec<_>>(), vec!["1024"]);
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_connection_closed() {
        let wire: &[u8] = &[0, 0, 0, 10, b'p', b'a', b'r', b't'];
        let mut reader = FrameReader::new(wire);
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_eof_at_frame_boundary_is_connection_closed() {
        let mut reader = FrameReader::new(&[][..]);
        let err = reader.read().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionClosed);
    }

    #[test]
    fn test_frame_prefix_is_big_endian() {
        assert_eq!(frame_prefix(5).unwrap(), [0, 0, 0, 5]);
        assert_eq!(frame_prefix(0x0102_0304).unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_build_frame_layout() {
        let frame = build_frame(b"abc").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }
}
