//! Bounded-chunk payload streaming between a connection and a file.
//!
//! Both directions move at most one chunk at a time, so memory per session
//! stays constant regardless of document size.

use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Chunk size used for both upload and download.
pub const CHUNK_SIZE: usize = 4096;

/// Which side of a transfer failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("reading from source failed: {0}")]
    Read(#[source] io::Error),
    #[error("writing to sink failed: {0}")]
    Write(#[source] io::Error),
}

/// Moves payload bytes in fixed-size chunks, with an optional deadline on
/// every individual read and write.
#[derive(Debug, Clone, Copy)]
pub struct Streamer {
    chunk_size: usize,
    io_timeout: Option<Duration>,
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, None)
    }
}

impl Streamer {
    pub fn new(chunk_size: usize, io_timeout: Option<Duration>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            io_timeout,
        }
    }

    /// Copy up to `n` bytes from `source` into `sink`.
    ///
    /// Stops early if the source reaches end-of-stream and never reads past
    /// `n`. Returns the number of bytes transferred; the caller decides whether
    /// a short count is an error.
    pub async fn receive_exactly<R, W>(
        &self,
        source: &mut R,
        sink: &mut W,
        n: u64,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::zeroed(self.chunk_size);
        let mut received: u64 = 0;

        while received < n {
            let want = (n - received).min(self.chunk_size as u64) as usize;
            let read = with_timeout(self.io_timeout, source.read(&mut buffer[..want]))
                .await
                .map_err(TransferError::Read)?;
            if read == 0 {
                trace!(received, expected = n, "Source closed before transfer completed");
                break;
            }

            with_timeout(self.io_timeout, sink.write_all(&buffer[..read]))
                .await
                .map_err(TransferError::Write)?;
            received += read as u64;
            trace!(chunk = read, total = received, "Received chunk");
        }

        with_timeout(self.io_timeout, sink.flush())
            .await
            .map_err(TransferError::Write)?;
        Ok(received)
    }

    /// Copy all of `source` into `sink`, flushing before returning.
    pub async fn send_all<R, W>(&self, source: &mut R, sink: &mut W) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::zeroed(self.chunk_size);
        let mut sent: u64 = 0;

        loop {
            let read = with_timeout(self.io_timeout, source.read(&mut buffer))
                .await
                .map_err(TransferError::Read)?;
            if read == 0 {
                break;
            }

            with_timeout(self.io_timeout, sink.write_all(&buffer[..read]))
                .await
                .map_err(TransferError::Write)?;
            sent += read as u64;
            trace!(chunk = read, total = sent, "Sent chunk");
        }

        with_timeout(self.io_timeout, sink.flush())
            .await
            .map_err(TransferError::Write)?;
        Ok(sent)
    }
}

/// Run a fallible I/O future under an optional deadline, reporting expiry as
/// an `io::ErrorKind::TimedOut` error.
pub async fn with_timeout<F, T, E>(limit: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<io::Error>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(limit).into()),
        },
        None => fut.await,
    }
}

/// The error reported when a deadline expires.
pub fn timed_out(limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("operation timed out after {limit:?}"),
    )
}
