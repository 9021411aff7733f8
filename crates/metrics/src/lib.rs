//! Internal instrumentation
//!
//! Process-wide counters, the snapshot types read by the HTTP status
//! endpoint, and the reporter that re-emits those counters as Carbon lines
//! to a configured Graphite address.
//!
//! Counters are lock-free atomics; readers take owned snapshots. Components
//! own their counters and expose them through the provider traits here.

mod ingest;
mod reporter;
mod status;

pub use ingest::{IngestMetrics, IngestSnapshot};
pub use reporter::{GraphiteReporter, GraphiteReporterConfig};
pub use status::{ConnectionState, DestinationStatus, RelayStatusProvider, TableStatus};
