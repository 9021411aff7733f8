//! Ingest counters
//!
//! Shared by the TCP and UDP sources; one instance per process.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the ingest side of the relay.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Complete lines read from any socket.
    pub num_in: AtomicU64,

    /// Lines rejected by validation.
    pub num_invalid: AtomicU64,

    /// Lines discarded because they exceeded the framing limit.
    pub num_err_truncated: AtomicU64,
}

impl IngestMetrics {
    /// Create a zeroed metrics instance.
    pub const fn new() -> Self {
        Self {
            num_in: AtomicU64::new(0),
            num_invalid: AtomicU64::new(0),
            num_err_truncated: AtomicU64::new(0),
        }
    }

    /// Record a complete line read.
    #[inline]
    pub fn line_in(&self) {
        self.num_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line rejected by validation.
    #[inline]
    pub fn line_invalid(&self) {
        self.num_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an oversized line that was consumed and discarded.
    #[inline]
    pub fn line_truncated(&self) {
        self.num_err_truncated.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            num_in: self.num_in.load(Ordering::Relaxed),
            num_invalid: self.num_invalid.load(Ordering::Relaxed),
            num_err_truncated: self.num_err_truncated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of ingest counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestSnapshot {
    pub num_in: u64,
    pub num_invalid: u64,
    pub num_err_truncated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = IngestMetrics::new();
        metrics.line_in();
        metrics.line_in();
        metrics.line_invalid();
        metrics.line_truncated();

        let snap = metrics.snapshot();
        assert_eq!(snap.num_in, 2);
        assert_eq!(snap.num_invalid, 1);
        assert_eq!(snap.num_err_truncated, 1);
    }
}
