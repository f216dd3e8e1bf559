//! Exact-length reads from a streaming connection.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{HostError, Result};

/// Read exactly `len` bytes, accumulating as many partial reads as needed.
///
/// Never asks the reader for more than the bytes still missing, so whatever
/// follows the frame stays in the stream. Ends with
/// [`HostError::ConnectionClosed`] when the stream hits EOF first.
pub async fn read_exact_bytes<R>(reader: &mut R, len: usize) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(len);
    let mut filled = 0;

    while filled < len {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| HostError::Protocol(format!("socket read failed: {}", e)))?;
        if n == 0 {
            return Err(HostError::ConnectionClosed {
                expected: len,
                received: filled,
            });
        }
        filled += n;
    }

    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out at most `chunk` bytes per poll.
    pub(crate) struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl ChunkedReader {
        pub(crate) fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk: chunk.max(1),
            }
        }

        pub(crate) fn remaining(&self) -> &[u8] {
            &self.data[self.pos..]
        }
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self
                .chunk
                .min(buf.remaining())
                .min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_exact_across_fragments() {
        let mut reader = ChunkedReader::new(b"hello world".to_vec(), 3);
        let buf = read_exact_bytes(&mut reader, 5).await.unwrap();
        assert_eq!(&buf[..], b"hello");
        assert_eq!(reader.remaining(), b" world");
    }

    #[tokio::test]
    async fn test_read_exact_zero_len() {
        let mut reader = ChunkedReader::new(Vec::new(), 1);
        let buf = read_exact_bytes(&mut reader, 0).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_early() {
        let mut reader = ChunkedReader::new(vec![7u8; 50], 16);
        let err = read_exact_bytes(&mut reader, 100).await.unwrap_err();
        match err {
            HostError::ConnectionClosed { expected, received } => {
                assert_eq!(expected, 100);
                assert_eq!(received, 50);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_fragmentation_does_not_matter(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..64,
            extra in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let mut stream = data.clone();
            stream.extend_from_slice(&extra);
            let mut reader = ChunkedReader::new(stream, chunk);

            let buf = rt.block_on(read_exact_bytes(&mut reader, data.len())).unwrap();
            prop_assert_eq!(&buf[..], &data[..]);
            prop_assert_eq!(reader.remaining(), &extra[..]);
        }
    }
}
