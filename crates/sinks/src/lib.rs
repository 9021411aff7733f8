//! Egress side of the relay
//!
//! A [`Destination`] is one TCP client to one downstream Carbon endpoint.
//! It owns a bounded in-memory queue, a writer task with a connection state
//! machine, and an optional on-disk [`Spool`] that absorbs overflow and
//! downtime. Nothing else may touch a destination's queue or spool.
//!
//! Submission is non-blocking end to end: the ingest hot path calls
//! [`Destination::submit`], which either enqueues, spools, or drops - it
//! never waits on the network.

mod destination;
mod error;
mod spool;

pub use destination::{Destination, DestinationConfig, DestinationMetrics, SubmitOutcome};
pub use error::SinkError;
pub use spool::{Spool, SpoolConfig};
