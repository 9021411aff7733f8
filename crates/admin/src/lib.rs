//! Administration surfaces
//!
//! Two ways to look at and mutate a running relay:
//!
//! - a line-oriented TCP listener speaking the table command grammar
//!   (`addRoute`, `delRoute`, ... plus `view` and `help`), and
//! - a read-only HTTP status endpoint (health, table rendering, counters,
//!   recently rejected lines).
//!
//! The same [`parse_command`] feeds the TCP listener and the config file's
//! `init` list, so the two surfaces cannot drift apart.

mod http;
mod parse;
mod server;

pub use http::{http_router, HttpState};
pub use parse::parse_command;
pub use server::AdminServer;
