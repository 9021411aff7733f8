//! UDP ingest
//!
//! One reader task on the listen address. Each datagram may carry several
//! newline-separated lines; every non-empty line goes through the same
//! pipeline as TCP input.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::pipeline::IngestPipeline;

/// Largest datagram we accept (UDP payload maximum).
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Kernel receive buffer request; bursts of datagrams are the norm.
const RECV_BUFFER_SIZE: usize = 256 * 1024;

/// Bind the ingest UDP socket with an enlarged receive buffer.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        tracing::warn!(
            error = %e,
            requested = RECV_BUFFER_SIZE,
            "failed to set UDP SO_RCVBUF"
        );
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// UDP reader feeding the ingest pipeline.
pub struct UdpIngest {
    pipeline: Arc<IngestPipeline>,
}

impl UdpIngest {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }

    /// Read datagrams until cancelled.
    pub async fn run(&self, socket: UdpSocket, cancel: CancellationToken) {
        let local = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        tracing::info!(addr = %local, "udp ingest listening");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, _peer)) => {
                        for line in buf[..len].split(|&b| b == b'\n') {
                            let line = trim_cr(line);
                            if !line.is_empty() {
                                self.pipeline.process(line);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "udp recv error");
                    }
                },
            }
        }

        tracing::info!(addr = %local, "udp ingest stopped");
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

#[cfg(test)]
#[path = "udp_test.rs"]
mod udp_test;
