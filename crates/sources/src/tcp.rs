//! TCP ingest
//!
//! One acceptor task; one reader task per accepted connection. Readers
//! frame newline-terminated lines with a hard length bound: a line longer
//! than [`MAX_LINE_LENGTH`] is consumed to its newline and discarded, and a
//! trailing partial line at EOF is discarded too.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use cinder_protocol::MAX_LINE_LENGTH;

use crate::pipeline::IngestPipeline;

/// Read buffer per connection.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP acceptor feeding the ingest pipeline.
pub struct TcpIngest {
    pipeline: Arc<IngestPipeline>,
}

impl TcpIngest {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }

    /// Accept connections until cancelled.
    ///
    /// The listener is bound (or inherited) by the caller so a graceful
    /// restart can adopt it without a fresh bind.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) {
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        tracing::info!(addr = %local, "tcp ingest listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let pipeline = Arc::clone(&self.pipeline);
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            handle_connection(pipeline, stream, peer, conn_cancel).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tcp accept error");
                    }
                },
            }
        }

        tracing::info!(addr = %local, "tcp ingest stopped");
    }
}

/// Read and process lines until EOF, error, or shutdown.
async fn handle_connection(
    pipeline: Arc<IngestPipeline>,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    tracing::debug!(peer = %peer, "connection opened");

    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, stream);
    let mut buf = Vec::with_capacity(MAX_LINE_LENGTH);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = next_frame(&mut reader, &mut buf, MAX_LINE_LENGTH) => match frame {
                Ok(Frame::Line) => {
                    pipeline.process(trim_cr(&buf));
                }
                Ok(Frame::Truncated) => {
                    pipeline.record_truncated();
                    tracing::debug!(
                        peer = %peer,
                        limit = MAX_LINE_LENGTH,
                        "oversized line discarded"
                    );
                }
                Ok(Frame::Eof) => break,
                Err(e) => {
                    if !is_connection_reset(&e) {
                        tracing::debug!(peer = %peer, error = %e, "read error");
                    }
                    break;
                }
            },
        }
    }

    tracing::debug!(peer = %peer, "connection closed");
}

/// Outcome of framing one line.
enum Frame {
    /// A complete line is in the buffer.
    Line,
    /// The line exceeded the limit; it was consumed and discarded.
    Truncated,
    /// Stream ended. Any partial line is discarded.
    Eof,
}

/// Frame the next newline-terminated line into `buf`, never keeping more
/// than `limit` bytes.
async fn next_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<Frame> {
    buf.clear();
    let mut oversized = false;

    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(Frame::Eof);
        }

        match chunk.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                if !oversized && buf.len() + newline > limit {
                    oversized = true;
                }
                if !oversized {
                    buf.extend_from_slice(&chunk[..newline]);
                }
                reader.consume(newline + 1);
                return Ok(if oversized { Frame::Truncated } else { Frame::Line });
            }
            None => {
                if !oversized && buf.len() + chunk.len() > limit {
                    oversized = true;
                }
                if !oversized {
                    buf.extend_from_slice(chunk);
                }
                let n = chunk.len();
                reader.consume(n);
            }
        }
    }
}

/// Strip one trailing carriage return.
fn trim_cr(buf: &[u8]) -> &[u8] {
    match buf.last() {
        Some(b'\r') => &buf[..buf.len() - 1],
        _ => buf,
    }
}

/// Resets and aborts are expected connection ends, not errors worth noise.
fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
