//! Routes: a matcher bound to destinations and a fan-out policy

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cinder_protocol::Line;
use cinder_sinks::Destination;

use crate::matcher::Matcher;

/// How a route fans out across its destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Submit to every destination.
    SendAll,
    /// Submit to the first connected destination; this is failover by
    /// configured order, not load balancing.
    SendFirst,
}

impl RouteKind {
    /// Grammar spelling (`sendAllMatch` / `sendFirstMatch`).
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::SendAll => "sendAllMatch",
            RouteKind::SendFirst => "sendFirstMatch",
        }
    }
}

impl FromStr for RouteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sendAllMatch" => Ok(RouteKind::SendAll),
            "sendFirstMatch" => Ok(RouteKind::SendFirst),
            other => Err(format!("unknown route type '{other}'")),
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing table entry.
///
/// Routes are immutable; mutation replaces the route within a new table
/// snapshot. Destinations are shared with the replacing route where they
/// survive the change.
pub struct Route {
    key: String,
    kind: RouteKind,
    matcher: Matcher,
    dests: Vec<Arc<Destination>>,
}

impl Route {
    pub fn new(
        key: impl Into<String>,
        kind: RouteKind,
        matcher: Matcher,
        dests: Vec<Arc<Destination>>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            matcher,
            dests,
        }
    }

    /// Stable handle used by table commands.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn destinations(&self) -> &[Arc<Destination>] {
        &self.dests
    }

    /// Submit a line according to the fan-out policy.
    ///
    /// Partial failures (a destination dropping the line) are counted by
    /// that destination and do not affect its peers.
    pub fn dispatch(&self, line: &Line) {
        match self.kind {
            RouteKind::SendAll => {
                for dest in &self.dests {
                    dest.submit(line.clone());
                }
            }
            RouteKind::SendFirst => {
                let target = self
                    .dests
                    .iter()
                    .find(|d| d.is_connected())
                    .or_else(|| self.dests.first());
                if let Some(dest) = target {
                    dest.submit(line.clone());
                }
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("matcher", &self.matcher.describe())
            .field("dests", &self.dests.len())
            .finish()
    }
}
