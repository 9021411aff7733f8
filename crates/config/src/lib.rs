//! cinder configuration
//!
//! TOML-based configuration with defaults for everything except the
//! instance name. A minimal useful config:
//!
//! ```toml
//! instance = "relay-1"
//! listen_addr = "0.0.0.0:2003"
//! spool_dir = "/var/spool/cinder"
//! init = [
//!     "addRoute sendAllMatch core 127.0.0.1:2103 spool=true",
//! ]
//! ```
//!
//! Routes can be declared either as `init` commands (the admin grammar) or
//! as `[[route]]` tables; both are applied at startup and any failure is
//! fatal.

mod error;
mod logging;
mod routes;

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use cinder_protocol::ValidationLevel;
use cinder_routing::TableConfig;

pub use error::{ConfigError, Result};
pub use logging::LogLevel;
pub use routes::{DestinationEntry, RouteEntry};

/// Main configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Identifier of this relay; required, used in instrumentation metric
    /// names and the pid of the admin view.
    pub instance: String,

    /// TCP and UDP ingest address.
    pub listen_addr: String,

    /// Admin text-protocol address; empty disables the listener.
    pub admin_addr: String,

    /// HTTP status address; empty disables the endpoint.
    pub http_addr: String,

    /// Root directory for destination spools.
    pub spool_dir: String,

    /// Pid file path; empty writes none.
    pub pid_file: String,

    /// Default newly added untyped routes to sendFirstMatch.
    pub first_only: bool,

    /// Log level.
    pub log_level: LogLevel,

    /// How long rejected lines stay visible in the bad-metric store.
    #[serde(with = "humantime_serde")]
    pub bad_metrics_max_age: Duration,

    /// Validation level for legacy (untagged) metric ids.
    pub legacy_metric_validation: ValidationLevelConfig,

    /// Admin commands applied at startup, in order.
    pub init: Vec<String>,

    /// In-memory queue capacity per destination.
    pub queue_size: usize,

    /// Maximum wall time between destination writes.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Self-instrumentation settings.
    pub instrumentation: Instrumentation,

    /// Declarative routes, applied after `init`.
    #[serde(rename = "route")]
    pub routes: Vec<RouteEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: String::new(),
            listen_addr: "0.0.0.0:2003".into(),
            admin_addr: String::new(),
            http_addr: String::new(),
            spool_dir: "spool".into(),
            pid_file: String::new(),
            first_only: false,
            log_level: LogLevel::Info,
            bad_metrics_max_age: Duration::from_secs(24 * 3600),
            legacy_metric_validation: ValidationLevelConfig::Strict,
            init: Vec::new(),
            queue_size: 10_000,
            flush_interval: Duration::from_millis(1000),
            instrumentation: Instrumentation::default(),
            routes: Vec::new(),
        }
    }
}

/// Self-instrumentation: re-emit internal counters as Carbon metrics.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Instrumentation {
    /// Graphite endpoint for internal counters; empty disables emission.
    pub graphite_addr: String,

    /// Emit interval in milliseconds.
    pub graphite_interval: u64,
}

/// Validation level as spelled in config files.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevelConfig {
    #[default]
    Strict,
    Medium,
    None,
}

impl From<ValidationLevelConfig> for ValidationLevel {
    fn from(level: ValidationLevelConfig) -> Self {
        match level {
            ValidationLevelConfig::Strict => ValidationLevel::Strict,
            ValidationLevelConfig::Medium => ValidationLevel::Medium,
            ValidationLevelConfig::None => ValidationLevel::None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.instance.is_empty() {
            return Err(ConfigError::Missing { field: "instance" });
        }
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Missing {
                field: "listen_addr",
            });
        }
        if !self.instrumentation.graphite_addr.is_empty()
            && self.instrumentation.graphite_interval == 0
        {
            return Err(ConfigError::invalid(
                "instrumentation.graphite_interval",
                "must be a positive number of milliseconds",
            ));
        }
        for route in &self.routes {
            route.validate()?;
        }
        Ok(())
    }

    /// Validation level for the ingest pipeline.
    pub fn validation_level(&self) -> ValidationLevel {
        self.legacy_metric_validation.into()
    }

    /// Table configuration derived from the relay-wide settings.
    pub fn table_config(&self) -> TableConfig {
        let mut table = TableConfig::new(&self.spool_dir);
        table.first_only = self.first_only;
        table.queue_capacity = self.queue_size;
        table.flush_interval = self.flush_interval;
        table
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_str("instance = \"test\"").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:2003");
        assert_eq!(config.spool_dir, "spool");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.validation_level(), ValidationLevel::Strict);
        assert_eq!(config.bad_metrics_max_age, Duration::from_secs(86400));
        assert!(!config.first_only);
    }

    #[test]
    fn empty_instance_is_rejected() {
        let err = Config::from_str("").unwrap_err();
        assert!(err.to_string().contains("instance"));
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
instance = "relay-1"
listen_addr = "0.0.0.0:2003"
admin_addr = "127.0.0.1:2004"
http_addr = "127.0.0.1:8081"
spool_dir = "/var/spool/cinder"
pid_file = "/run/cinder.pid"
first_only = true
log_level = "debug"
bad_metrics_max_age = "30m"
legacy_metric_validation = "medium"
queue_size = 50000
flush_interval = "500ms"
init = [
    "addBlack junk.",
    "addRoute sendAllMatch core 127.0.0.1:2103 spool=true",
]

[instrumentation]
graphite_addr = "127.0.0.1:2003"
graphite_interval = 5000

[[route]]
key = "backup"
type = "sendFirstMatch"
prefix = "important."

[[route.destination]]
addr = "10.0.0.1:2003"
spool = true
pickle = true

[[route.destination]]
addr = "10.0.0.2:2003"
"#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.instance, "relay-1");
        assert_eq!(config.validation_level(), ValidationLevel::Medium);
        assert_eq!(config.bad_metrics_max_age, Duration::from_secs(1800));
        assert_eq!(config.flush_interval, Duration::from_millis(500));
        assert_eq!(config.init.len(), 2);
        assert_eq!(config.instrumentation.graphite_interval, 5000);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].destinations.len(), 2);
        assert_eq!(config.routes[0].destinations[0].pickle, Some(true));

        let table = config.table_config();
        assert!(table.first_only);
        assert_eq!(table.queue_capacity, 50_000);
    }

    #[test]
    fn bad_validation_level_is_rejected() {
        let toml = "instance = \"x\"\nlegacy_metric_validation = \"paranoid\"";
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let toml = "instance = \"x\"\nlisten_address = \"oops\"";
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn instrumentation_requires_interval_with_addr() {
        let toml = r#"
instance = "x"
[instrumentation]
graphite_addr = "127.0.0.1:2003"
graphite_interval = 0
"#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn route_without_destination_is_rejected() {
        let toml = r#"
instance = "x"
[[route]]
key = "empty"
"#;
        assert!(Config::from_str(toml).is_err());
    }
}
