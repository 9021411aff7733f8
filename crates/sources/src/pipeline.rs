//! Per-line ingest pipeline
//!
//! The fixed sequence every framed line goes through, shared by the TCP and
//! UDP readers: count it, validate it, then either dispatch it or record
//! the rejection.

use std::sync::Arc;

use bytes::Bytes;

use cinder_badmetrics::BadMetrics;
use cinder_metrics::IngestMetrics;
use cinder_protocol::{validate, Line, ValidationLevel};
use cinder_routing::Table;

/// Shared validate-and-dispatch stage.
pub struct IngestPipeline {
    table: Arc<Table>,
    bad_metrics: Arc<BadMetrics>,
    metrics: Arc<IngestMetrics>,
    level: ValidationLevel,
}

impl IngestPipeline {
    pub fn new(
        table: Arc<Table>,
        bad_metrics: Arc<BadMetrics>,
        metrics: Arc<IngestMetrics>,
        level: ValidationLevel,
    ) -> Self {
        Self {
            table,
            bad_metrics,
            metrics,
            level,
        }
    }

    /// Ingest counters, shared with the status surfaces.
    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    /// Process one complete framed line (no trailing newline).
    pub fn process(&self, raw: &[u8]) {
        if raw.is_empty() {
            return;
        }

        self.metrics.line_in();

        match validate(raw, self.level) {
            Ok(()) => {
                let line = Line::from_validated(Bytes::copy_from_slice(raw));
                self.table.dispatch(&line);
            }
            Err(reason) => {
                let metric = raw
                    .split(|b| b.is_ascii_whitespace())
                    .find(|f| !f.is_empty())
                    .unwrap_or(b"");
                self.bad_metrics.add(metric, raw, &reason.to_string());
                self.metrics.line_invalid();
            }
        }
    }

    /// Record a line discarded by the framer for exceeding the length
    /// limit.
    pub fn record_truncated(&self) {
        self.metrics.line_truncated();
    }
}
