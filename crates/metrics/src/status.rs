//! Status snapshot types
//!
//! Owned, serializable views of component state, produced on demand for the
//! HTTP status endpoint and the Graphite reporter. Destinations come and go
//! with table reconfiguration, so status is pulled through a provider trait
//! rather than captured in a fixed registry at startup.

use serde::Serialize;

/// Connection state of a destination's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    /// Lowercase name for logs and admin views.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Point-in-time status of one destination.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationStatus {
    /// Key of the route owning this destination.
    pub route_key: String,
    /// Downstream address.
    pub addr: String,
    /// Instance qualifier (distinguishes several destinations per address).
    pub instance: String,
    /// Writer connection state.
    pub state: ConnectionState,
    /// Lines currently queued in memory.
    pub queue_depth: u64,
    /// In-memory queue capacity.
    pub queue_capacity: u64,
    /// Lines written to the downstream.
    pub num_out: u64,
    /// Failed TCP writes.
    pub num_err_write: u64,
    /// Lines dropped because both queue and spool were unavailable.
    pub num_drop_buff_full: u64,
    /// Lines diverted to the spool.
    pub num_spool: u64,
}

/// Point-in-time status of the routing table itself.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TableStatus {
    /// Number of routes in the current snapshot.
    pub num_routes: u64,
    /// Number of blacklist entries.
    pub num_blacklist: u64,
    /// Lines dropped by the blacklist.
    pub num_blackholed: u64,
    /// Lines that matched no route.
    pub num_unroutable: u64,
}

/// Pull-based status source, implemented by the routing table.
pub trait RelayStatusProvider: Send + Sync {
    /// Table-level counters.
    fn table_status(&self) -> TableStatus;

    /// Status of every destination in the current snapshot.
    fn destination_status(&self) -> Vec<DestinationStatus>;
}
