//! Graphite instrumentation reporter
//!
//! Periodically re-emits the relay's own counters as Carbon plain lines to
//! a configured Graphite address. The connection is kept open across ticks
//! and re-dialed on the next tick after any error; a failed emit never
//! affects the relay itself.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::ingest::IngestMetrics;
use crate::status::RelayStatusProvider;

/// Reporter configuration.
#[derive(Debug, Clone)]
pub struct GraphiteReporterConfig {
    /// Graphite endpoint, host:port.
    pub addr: String,
    /// Emit interval.
    pub interval: Duration,
    /// Metric prefix, typically `cinder.<instance>`.
    pub prefix: String,
}

/// Periodic counter emitter.
pub struct GraphiteReporter {
    config: GraphiteReporterConfig,
    ingest: Arc<IngestMetrics>,
    status: Arc<dyn RelayStatusProvider>,
}

impl GraphiteReporter {
    /// Create a reporter over the given counter sources.
    pub fn new(
        config: GraphiteReporterConfig,
        ingest: Arc<IngestMetrics>,
        status: Arc<dyn RelayStatusProvider>,
    ) -> Self {
        Self {
            config,
            ingest,
            status,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            addr = %self.config.addr,
            interval_ms = self.config.interval.as_millis() as u64,
            "instrumentation reporter starting"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut conn: Option<TcpStream> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let payload = self.render();
                    if let Err(e) = emit(&mut conn, &self.config.addr, payload.as_bytes()).await {
                        tracing::debug!(
                            addr = %self.config.addr,
                            error = %e,
                            "instrumentation emit failed, will redial next tick"
                        );
                        conn = None;
                    }
                }
            }
        }

        tracing::info!("instrumentation reporter stopped");
    }

    /// Render all counters as Carbon plain lines.
    fn render(&self) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let prefix = &self.config.prefix;
        let mut out = String::with_capacity(1024);

        let ingest = self.ingest.snapshot();
        let _ = writeln!(out, "{prefix}.num_in {} {ts}", ingest.num_in);
        let _ = writeln!(out, "{prefix}.num_invalid {} {ts}", ingest.num_invalid);
        let _ = writeln!(
            out,
            "{prefix}.num_err_truncated {} {ts}",
            ingest.num_err_truncated
        );

        let table = self.status.table_status();
        let _ = writeln!(out, "{prefix}.num_blackholed {} {ts}", table.num_blackholed);
        let _ = writeln!(out, "{prefix}.num_unroutable {} {ts}", table.num_unroutable);

        for dest in self.status.destination_status() {
            let node = sanitize_node(&format!("{}_{}", dest.addr, dest.instance));
            let route = sanitize_node(&dest.route_key);
            let base = format!("{prefix}.dest.{route}.{node}");
            let _ = writeln!(out, "{base}.num_out {} {ts}", dest.num_out);
            let _ = writeln!(out, "{base}.num_err_write {} {ts}", dest.num_err_write);
            let _ = writeln!(
                out,
                "{base}.num_drop_buff_full {} {ts}",
                dest.num_drop_buff_full
            );
            let _ = writeln!(out, "{base}.num_spool {} {ts}", dest.num_spool);
            let _ = writeln!(out, "{base}.queue_depth {} {ts}", dest.queue_depth);
            let _ = writeln!(
                out,
                "{base}.connected {} {ts}",
                u8::from(dest.state == crate::status::ConnectionState::Connected)
            );
        }

        out
    }
}

/// Write one payload, dialing first if there is no live connection.
async fn emit(
    conn: &mut Option<TcpStream>,
    addr: &str,
    payload: &[u8],
) -> std::io::Result<()> {
    if conn.is_none() {
        *conn = Some(TcpStream::connect(addr).await?);
    }

    let stream = conn.as_mut().expect("connection present after dial");
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Make a string safe to use as one node of a legacy metric path.
fn sanitize_node(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
