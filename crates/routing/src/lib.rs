//! Routing table and dispatch path
//!
//! The hot path of the relay: every validated line is handed to
//! [`Table::dispatch`], which matches it against the current snapshot of
//! routes and submits it to the destinations they select. Dispatch is safe
//! for any number of concurrent callers, takes one atomic snapshot load per
//! call, and never blocks.
//!
//! Mutation goes through [`Table::apply`] with a [`Command`]: the table
//! builds a new immutable snapshot and swaps it in atomically, so a
//! concurrent dispatch observes either the old or the new route set, never
//! a half-applied one. Destinations removed by a command are shut down
//! after the swap, once in-flight dispatches into the old snapshot have no
//! way to reach them anymore.

mod command;
mod matcher;
mod route;
mod table;

pub use command::{Command, CommandError, DestOpts, DestSpec, MatcherSpec};
pub use matcher::Matcher;
pub use route::{Route, RouteKind};
pub use table::{Table, TableConfig};
