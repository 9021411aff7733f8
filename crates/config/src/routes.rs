//! Declarative route configuration
//!
//! `[[route]]` tables are the config-file equivalent of `addRoute`
//! commands; each converts to a [`Command`] applied at startup.

use serde::Deserialize;

use cinder_routing::{Command, DestSpec, MatcherSpec, RouteKind};

use crate::error::{ConfigError, Result};

/// One `[[route]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteEntry {
    /// Stable route key.
    pub key: String,

    /// `sendAllMatch` or `sendFirstMatch`; empty takes the table default.
    #[serde(rename = "type")]
    pub kind: String,

    /// Metric-id prefix predicate.
    pub prefix: Option<String>,

    /// Metric-id substring predicate.
    pub sub: Option<String>,

    /// Metric-id regex predicate.
    pub regex: Option<String>,

    /// Destinations of this route.
    #[serde(rename = "destination")]
    pub destinations: Vec<DestinationEntry>,
}

impl Default for RouteEntry {
    fn default() -> Self {
        Self {
            key: String::new(),
            kind: String::new(),
            prefix: None,
            sub: None,
            regex: None,
            destinations: Vec::new(),
        }
    }
}

/// One `[[route.destination]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DestinationEntry {
    /// Downstream address, host:port.
    pub addr: String,

    /// Instance qualifier for the spool namespace.
    pub instance: Option<String>,

    /// Spool to disk on overflow and downtime.
    pub spool: Option<bool>,

    /// Speak the pickle protocol.
    pub pickle: Option<bool>,
}

impl RouteEntry {
    /// Structural checks done at config load, before the table exists.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ConfigError::Missing { field: "route.key" });
        }
        if self.destinations.is_empty() {
            return Err(ConfigError::invalid(
                "route",
                format!("route '{}' has no destinations", self.key),
            ));
        }
        for dest in &self.destinations {
            if dest.addr.is_empty() {
                return Err(ConfigError::Missing {
                    field: "route.destination.addr",
                });
            }
        }
        if !self.kind.is_empty() && self.kind.parse::<RouteKind>().is_err() {
            return Err(ConfigError::invalid(
                "route.type",
                format!("route '{}': unknown type '{}'", self.key, self.kind),
            ));
        }
        Ok(())
    }

    /// Convert to the equivalent `addRoute` command.
    pub fn to_command(&self) -> Command {
        Command::AddRoute {
            kind: self.kind.parse().ok(),
            key: self.key.clone(),
            matcher: MatcherSpec {
                prefix: self.prefix.clone(),
                substring: self.sub.clone(),
                regex: self.regex.clone(),
            },
            dests: self
                .destinations
                .iter()
                .map(|d| DestSpec {
                    addr: d.addr.clone(),
                    instance: d.instance.clone(),
                    spool: d.spool,
                    pickle: d.pickle,
                })
                .collect(),
        }
    }
}
