//! Byte pumps between the HTTP connection and the CGI child.
//!
//! # Responsibilities
//! - Forward the request body to the child's stdin in bounded chunks
//! - Read the child's stdout in bounded chunks under a total output cap
//! - Collect stderr for diagnostics without ever blocking the child
//!
//! # Design Decisions
//! - Caps count bytes, not chunks; crossing one is reported, never truncated
//! - Stdin write failures only stop forwarding; the child may legitimately
//!   exit before reading its input
//! - Stdin is closed once the body ends so the child sees EOF

use std::io;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How forwarding the request body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBodyOutcome {
    /// Body fully read; carries the number of bytes received.
    Complete(u64),
    /// The body grew past the byte cap.
    TooLarge,
    /// The client connection failed mid-body.
    ClientError,
}

/// Stream `body` into `stdin`, `chunk_size` bytes per write.
pub async fn pump_request_body<W>(
    body: Body,
    mut stdin: W,
    chunk_size: usize,
    max_bytes: u64,
) -> RequestBodyOutcome
where
    W: AsyncWrite + Unpin,
{
    let mut stream = body.into_data_stream();
    let mut received: u64 = 0;
    let mut forwarding = true;

    while let Some(frame) = stream.next().await {
        let data = match frame {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Request body read failed");
                return RequestBodyOutcome::ClientError;
            }
        };

        received += data.len() as u64;
        if received > max_bytes {
            return RequestBodyOutcome::TooLarge;
        }

        if forwarding {
            for piece in data.chunks(chunk_size.max(1)) {
                if let Err(e) = stdin.write_all(piece).await {
                    tracing::debug!(error = %e, "CGI stdin closed early, discarding rest of body");
                    forwarding = false;
                    break;
                }
            }
        }
    }

    if forwarding {
        let _ = stdin.shutdown().await;
    }
    RequestBodyOutcome::Complete(received)
}

/// Errors reading the child's stdout.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("CGI output exceeded {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("failed to read CGI output: {0}")]
    Io(#[from] io::Error),
}

/// Chunked reader over the child's stdout with a total byte cap.
#[derive(Debug)]
pub struct OutputReader<R> {
    reader: R,
    chunk_size: usize,
    max_bytes: u64,
    total: u64,
}

impl<R: AsyncRead + Unpin> OutputReader<R> {
    pub fn new(reader: R, chunk_size: usize, max_bytes: u64) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            max_bytes,
            total: 0,
        }
    }

    /// Next chunk of output, `None` at end of stream.
    ///
    /// Cancel safe: a read that has not completed consumes nothing.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, OutputError> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        self.total += n as u64;
        if self.total > self.max_bytes {
            return Err(OutputError::TooLarge {
                limit: self.max_bytes,
            });
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    /// Bytes read so far.
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Shared, bounded copy of everything the child wrote to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl StderrBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `stderr` until EOF, keeping at most `limit` bytes.
    ///
    /// Reading continues past the limit so the child never blocks on a
    /// full pipe.
    pub async fn collect<R>(self, mut stderr: R, limit: usize)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 8192];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = self.inner.lock() {
                        let room = limit.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        }
    }

    /// Copy of the bytes captured so far.
    pub fn snapshot(&self) -> Bytes {
        self.inner
            .lock()
            .map(|buf| Bytes::copy_from_slice(&buf))
            .unwrap_or_default()
    }
}
