//! Table mutation commands
//!
//! The typed form of the admin command grammar. Parsers (the admin
//! listener, the config `init` list) produce these; [`crate::Table::apply`]
//! consumes them. A command either applies fully or leaves the table
//! untouched.

use thiserror::Error;

use cinder_sinks::SinkError;

use crate::route::RouteKind;

/// Unvalidated matcher predicates as they appear in commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherSpec {
    pub prefix: Option<String>,
    pub substring: Option<String>,
    pub regex: Option<String>,
}

impl MatcherSpec {
    /// Whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.substring.is_none() && self.regex.is_none()
    }
}

/// One destination as specified in a command: an address plus options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestSpec {
    /// Downstream address, host:port.
    pub addr: String,
    /// Instance qualifier; defaults to empty.
    pub instance: Option<String>,
    /// Spool to disk on overflow and downtime.
    pub spool: Option<bool>,
    /// Speak the pickle protocol instead of plain lines.
    pub pickle: Option<bool>,
}

impl DestSpec {
    /// Spec with only an address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }
}

/// Partial destination update for `modDest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestOpts {
    pub addr: Option<String>,
    pub spool: Option<bool>,
    pub pickle: Option<bool>,
}

impl DestOpts {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.addr.is_none() && self.spool.is_none() && self.pickle.is_none()
    }
}

/// A table mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Drop every line whose metric id starts with the prefix.
    AddBlack { prefix: String },

    /// Add a route. `kind: None` takes the table-wide default.
    AddRoute {
        kind: Option<RouteKind>,
        key: String,
        matcher: MatcherSpec,
        dests: Vec<DestSpec>,
    },

    /// Append a destination to an existing route.
    AddDest { key: String, dest: DestSpec },

    /// Update one destination of a route, by position.
    ModDest {
        key: String,
        index: usize,
        opts: DestOpts,
    },

    /// Replace a route's matcher.
    ModRoute { key: String, matcher: MatcherSpec },

    /// Remove a route and shut down its destinations.
    DelRoute { key: String },
}

/// Why a command was rejected.
///
/// Surfaced as text to the admin caller; the running table is unaffected.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no route with key '{key}'")]
    UnknownRoute { key: String },

    #[error("a route with key '{key}' already exists")]
    DuplicateRoute { key: String },

    #[error("route '{key}' has no destination at index {index}")]
    BadDestIndex { key: String, index: usize },

    #[error("destination {addr} already present in route '{key}'")]
    DuplicateDestination { key: String, addr: String },

    #[error("a route needs at least one destination")]
    NoDestinations,

    #[error("a spooling destination for {addr} already exists; use a distinct instance")]
    SpoolInUse { addr: String },

    #[error("invalid regex '{pattern}': {reason}")]
    BadRegex { pattern: String, reason: String },

    #[error("modDest changes nothing")]
    EmptyUpdate,

    #[error("cannot parse command: {0}")]
    Parse(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
