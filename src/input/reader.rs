use bytes::{Bytes, BytesMut};
use std::io;
use std::path::Path;
use std::task::Poll;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("input read failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open input file {path}: {source}")]
    Open { path: String, source: io::Error },
}

/// Result of a single bounded read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Up to `read_size` bytes arrived.
    Data(Bytes),
    /// The source has nothing right now; try again later.
    Pending,
    /// End of input. Further calls keep returning `Eof`.
    Eof,
}

/// Pulls raw bytes from the input source without ever suspending the caller:
/// each `read` polls the underlying source exactly once.
pub struct InputReader {
    source: Box<dyn AsyncRead + Send + Unpin>,
    read_size: usize,
    eof: bool,
}

impl InputReader {
    pub fn new(source: Box<dyn AsyncRead + Send + Unpin>, read_size: usize) -> Self {
        Self {
            source,
            read_size: read_size.max(1),
            eof: false,
        }
    }

    pub fn stdin(read_size: usize) -> Self {
        Self::new(Box::new(tokio::io::stdin()), read_size)
    }

    pub async fn open_file(path: &Path, read_size: usize) -> Result<Self, InputError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| InputError::Open {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(Box::new(file), read_size))
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }

    /// Attempt to read up to `read_size` bytes.
    ///
    /// The read future is polled once and dropped if still pending; the
    /// source handle stays intact, so no bytes are lost between attempts.
    pub async fn read(&mut self) -> Result<ReadOutcome, InputError> {
        if self.eof {
            return Ok(ReadOutcome::Eof);
        }

        let mut buf = BytesMut::with_capacity(self.read_size);
        let fut = self.source.read_buf(&mut buf);
        tokio::pin!(fut);
        let polled: Poll<io::Result<usize>> =
            std::future::poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx))).await;

        match polled {
            Poll::Pending => Ok(ReadOutcome::Pending),
            Poll::Ready(Ok(0)) => {
                self.eof = true;
                Ok(ReadOutcome::Eof)
            }
            Poll::Ready(Ok(_)) => Ok(ReadOutcome::Data(buf.freeze())),
            Poll::Ready(Err(e)) => Err(InputError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_are_bounded_by_read_size() {
        let data: &[u8] = b"0123456789";
        let mut reader = InputReader::new(Box::new(data), 4);

        let ReadOutcome::Data(chunk) = reader.read().await.unwrap() else {
            panic!("expected data");
        };
        assert_eq!(&chunk[..], b"0123");
    }

    #[tokio::test]
    async fn test_eof_is_sticky() {
        let data: &[u8] = b"ab";
        let mut reader = InputReader::new(Box::new(data), 16);

        assert!(matches!(
            reader.read().await.unwrap(),
            ReadOutcome::Data(ref c) if &c[..] == b"ab"
        ));
        assert!(matches!(reader.read().await.unwrap(), ReadOutcome::Eof));
        assert!(reader.at_eof());
        assert!(matches!(reader.read().await.unwrap(), ReadOutcome::Eof));
    }

    #[tokio::test]
    async fn test_pending_source_reports_pending() {
        // A duplex pipe with no writer activity never has data ready.
        let (rx, _tx) = tokio::io::duplex(64);
        let mut reader = InputReader::new(Box::new(rx), 16);

        assert!(matches!(reader.read().await.unwrap(), ReadOutcome::Pending));
    }
}
