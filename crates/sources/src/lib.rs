//! Ingest side of the relay
//!
//! A TCP acceptor with one reader task per connection, and a UDP reader on
//! the same listen address. Both frame lines, run them through the
//! validation pipeline, and hand survivors to the routing table.
//!
//! Everything in this crate keeps the ingest loop moving: validation is
//! pure, dispatch never blocks, and rejected lines go to the bad-metric
//! store without waiting.

mod pipeline;
mod tcp;
mod udp;

pub use pipeline::IngestPipeline;
pub use tcp::TcpIngest;
pub use udp::{bind_udp, UdpIngest};
