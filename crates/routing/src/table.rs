//! The routing table
//!
//! Holds the current set of blacklist entries and routes as one immutable
//! snapshot behind an atomic pointer. `dispatch` loads the snapshot once
//! and walks it; `apply` builds a replacement snapshot under a writer lock
//! and swaps it in, so readers never contend with writers and never see a
//! half-applied command.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use cinder_metrics::{DestinationStatus, RelayStatusProvider, TableStatus};
use cinder_protocol::encode::WireFormat;
use cinder_protocol::Line;
use cinder_sinks::{Destination, DestinationConfig};

use crate::command::{Command, CommandError, DestOpts, DestSpec, MatcherSpec};
use crate::matcher::Matcher;
use crate::route::{Route, RouteKind};

/// Table-wide configuration and destination defaults.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Root directory for destination spools.
    pub spool_dir: PathBuf,

    /// Default kind for routes added without an explicit type.
    pub first_only: bool,

    /// In-memory queue capacity for new destinations.
    pub queue_capacity: usize,

    /// Flush interval for new destinations.
    pub flush_interval: Duration,
}

impl TableConfig {
    /// Defaults rooted at the given spool directory.
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            first_only: false,
            queue_capacity: 10_000,
            flush_interval: Duration::from_millis(1000),
        }
    }
}

/// One immutable view of the table.
#[derive(Default)]
struct Snapshot {
    blacklist: Vec<Matcher>,
    routes: Vec<Arc<Route>>,
}

/// The mutable routing table.
///
/// Created once at startup and mutated by admin commands for the process
/// lifetime.
pub struct Table {
    config: TableConfig,
    snapshot: ArcSwap<Snapshot>,
    /// Serializes `apply`; dispatch never takes it.
    apply_lock: Mutex<()>,
    num_blackholed: AtomicU64,
    num_unroutable: AtomicU64,
}

impl Table {
    /// Create an empty table.
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            apply_lock: Mutex::new(()),
            num_blackholed: AtomicU64::new(0),
            num_unroutable: AtomicU64::new(0),
        }
    }

    /// Route one validated line. Hot path: one snapshot load, no locks, no
    /// waiting.
    pub fn dispatch(&self, line: &Line) {
        let snapshot = self.snapshot.load();
        let metric = line.metric();

        for matcher in &snapshot.blacklist {
            if matcher.matches(metric) {
                self.num_blackholed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut matched = false;
        for route in &snapshot.routes {
            if route.matcher().matches(metric) {
                route.dispatch(line);
                matched = true;
            }
        }

        if !matched {
            self.num_unroutable.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply one mutation atomically.
    ///
    /// On success the returned string is a short confirmation for the admin
    /// caller. On error the table is unchanged. Destinations displaced by
    /// the command are shut down after the snapshot swap, so dispatches
    /// in flight on the old snapshot complete first.
    pub async fn apply(&self, command: Command) -> Result<String, CommandError> {
        let _guard = self.apply_lock.lock().await;
        let current = self.snapshot.load_full();

        let mut blacklist = current.blacklist.clone();
        let mut routes = current.routes.clone();
        let mut retired: Vec<Arc<Destination>> = Vec::new();

        let message = match command {
            Command::AddBlack { prefix } => {
                blacklist.push(Matcher::prefix(&prefix));
                format!("blacklisting prefix '{prefix}'")
            }

            Command::AddRoute {
                kind,
                key,
                matcher,
                dests,
            } => {
                if routes.iter().any(|r| r.key() == key) {
                    return Err(CommandError::DuplicateRoute { key });
                }
                if dests.is_empty() {
                    return Err(CommandError::NoDestinations);
                }
                let kind = kind.unwrap_or(if self.config.first_only {
                    RouteKind::SendFirst
                } else {
                    RouteKind::SendAll
                });
                let matcher = compile(&matcher)?;
                for spec in &dests {
                    ensure_spool_free(&routes, spec, None)?;
                }
                let dests = self.spawn_all(&key, &dests).await?;
                let count = dests.len();
                routes.push(Arc::new(Route::new(&key, kind, matcher, dests)));
                format!("added route '{key}' ({kind}, {count} destinations)")
            }

            Command::AddDest { key, dest } => {
                let pos = position(&routes, &key)?;
                let route = &routes[pos];
                let instance = dest.instance.clone().unwrap_or_default();
                if route
                    .destinations()
                    .iter()
                    .any(|d| d.addr() == dest.addr && d.instance() == instance)
                {
                    return Err(CommandError::DuplicateDestination {
                        key,
                        addr: dest.addr,
                    });
                }
                ensure_spool_free(&routes, &dest, None)?;
                let addr = dest.addr.clone();
                let new_dest = self.spawn_destination(&dest)?;
                let mut dests = route.destinations().to_vec();
                dests.push(new_dest);
                let replacement = Arc::new(Route::new(
                    route.key(),
                    route.kind(),
                    route.matcher().clone(),
                    dests,
                ));
                routes[pos] = replacement;
                format!("added destination {addr} to route '{key}'")
            }

            Command::ModDest { key, index, opts } => {
                if opts.is_empty() {
                    return Err(CommandError::EmptyUpdate);
                }
                let pos = position(&routes, &key)?;
                let route = &routes[pos];
                let old = route
                    .destinations()
                    .get(index)
                    .cloned()
                    .ok_or(CommandError::BadDestIndex {
                        key: key.clone(),
                        index,
                    })?;

                let spec = merge(old.config(), &opts);
                let instance = spec.instance.clone().unwrap_or_default();
                if route
                    .destinations()
                    .iter()
                    .enumerate()
                    .any(|(i, d)| i != index && d.addr() == spec.addr && d.instance() == instance)
                {
                    return Err(CommandError::DuplicateDestination {
                        key,
                        addr: spec.addr,
                    });
                }
                ensure_spool_free(&routes, &spec, Some(&old))?;

                // A replacement at the same identity adopts the old spool
                // files, so the old writer must release them first. Lines
                // dispatched to the old destination during this handover are
                // dropped and counted.
                let adopts_spool = old.config().spool_enabled
                    && spec.spool == Some(true)
                    && spec.addr == old.config().addr;
                if adopts_spool {
                    old.shutdown().await;
                }

                let new_dest = self.spawn_destination(&spec)?;

                let mut dests = route.destinations().to_vec();
                dests[index] = new_dest;
                let replacement = Arc::new(Route::new(
                    route.key(),
                    route.kind(),
                    route.matcher().clone(),
                    dests,
                ));
                routes[pos] = replacement;
                if !adopts_spool {
                    retired.push(old);
                }
                format!("destination {index} of route '{key}' replaced")
            }

            Command::ModRoute { key, matcher } => {
                let pos = position(&routes, &key)?;
                let route = &routes[pos];
                let matcher = compile(&matcher)?;
                let replacement = Arc::new(Route::new(
                    route.key(),
                    route.kind(),
                    matcher,
                    route.destinations().to_vec(),
                ));
                routes[pos] = replacement;
                format!("route '{key}' matcher updated")
            }

            Command::DelRoute { key } => {
                let pos = position(&routes, &key)?;
                let route = routes.remove(pos);
                retired.extend(route.destinations().iter().cloned());
                format!("removed route '{key}'")
            }
        };

        self.snapshot
            .store(Arc::new(Snapshot { blacklist, routes }));

        for dest in retired {
            tracing::info!(dest = %dest.addr(), "shutting down displaced destination");
            dest.shutdown().await;
        }

        tracing::info!(%message, "table command applied");
        Ok(message)
    }

    /// Render the current snapshot for the admin view.
    ///
    /// Line-oriented and stable: blacklist entries first, then routes with
    /// their destinations.
    pub fn print(&self) -> String {
        let snapshot = self.snapshot.load();
        let mut out = String::new();

        let _ = writeln!(out, "spool dir: {}", self.config.spool_dir.display());

        let _ = writeln!(out, "blacklist:");
        for matcher in &snapshot.blacklist {
            let _ = writeln!(out, "  {}", matcher.describe());
        }

        let _ = writeln!(out, "routes:");
        for route in &snapshot.routes {
            let _ = writeln!(
                out,
                "  {} {} [{}]",
                route.key(),
                route.kind(),
                route.matcher().describe()
            );
            for dest in route.destinations() {
                let config = dest.config();
                let _ = writeln!(
                    out,
                    "    -> {} instance={} format={} spool={} state={}",
                    dest.addr(),
                    if dest.instance().is_empty() { "-" } else { dest.instance() },
                    config.format,
                    config.spool_enabled,
                    dest.metrics().state().as_str()
                );
            }
        }

        out
    }

    /// Number of routes in the current snapshot.
    pub fn route_count(&self) -> usize {
        self.snapshot.load().routes.len()
    }

    /// Shut down every destination; the table ends empty.
    pub async fn shutdown(&self) {
        let _guard = self.apply_lock.lock().await;
        let old = self.snapshot.swap(Arc::new(Snapshot::default()));

        for route in &old.routes {
            for dest in route.destinations() {
                dest.shutdown().await;
            }
        }
    }

    async fn spawn_all(
        &self,
        key: &str,
        specs: &[DestSpec],
    ) -> Result<Vec<Arc<Destination>>, CommandError> {
        let mut dests: Vec<Arc<Destination>> = Vec::with_capacity(specs.len());

        for spec in specs {
            let instance = spec.instance.clone().unwrap_or_default();
            if dests
                .iter()
                .any(|d| d.addr() == spec.addr && d.instance() == instance)
            {
                let cleanup = dests;
                for dest in cleanup {
                    dest.shutdown().await;
                }
                return Err(CommandError::DuplicateDestination {
                    key: key.to_string(),
                    addr: spec.addr.clone(),
                });
            }
            match self.spawn_destination(spec) {
                Ok(dest) => dests.push(dest),
                Err(e) => {
                    for dest in dests {
                        dest.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(dests)
    }

    fn spawn_destination(&self, spec: &DestSpec) -> Result<Arc<Destination>, CommandError> {
        let mut config = DestinationConfig::new(&spec.addr, &self.config.spool_dir);
        config.instance = spec.instance.clone().unwrap_or_default();
        config.queue_capacity = self.config.queue_capacity;
        config.flush_interval = self.config.flush_interval;
        config.spool_enabled = spec.spool.unwrap_or(false);
        config.format = if spec.pickle.unwrap_or(false) {
            WireFormat::Pickle
        } else {
            WireFormat::Plain
        };
        Ok(Destination::spawn(config)?)
    }
}

impl RelayStatusProvider for Table {
    fn table_status(&self) -> TableStatus {
        let snapshot = self.snapshot.load();
        TableStatus {
            num_routes: snapshot.routes.len() as u64,
            num_blacklist: snapshot.blacklist.len() as u64,
            num_blackholed: self.num_blackholed.load(Ordering::Relaxed),
            num_unroutable: self.num_unroutable.load(Ordering::Relaxed),
        }
    }

    fn destination_status(&self) -> Vec<DestinationStatus> {
        let snapshot = self.snapshot.load();
        let mut out = Vec::new();
        for route in &snapshot.routes {
            for dest in route.destinations() {
                out.push(dest.status(route.key()));
            }
        }
        out
    }
}

fn compile(spec: &MatcherSpec) -> Result<Matcher, CommandError> {
    Matcher::new(
        spec.prefix.as_deref(),
        spec.substring.as_deref(),
        spec.regex.as_deref(),
    )
}

/// A spooling destination owns its segment files exclusively; a second live
/// destination at the same `(addr, instance)` with spooling on would corrupt
/// them. Reject the command instead.
fn ensure_spool_free(
    routes: &[Arc<Route>],
    spec: &DestSpec,
    exclude: Option<&Arc<Destination>>,
) -> Result<(), CommandError> {
    if spec.spool != Some(true) {
        return Ok(());
    }
    let instance = spec.instance.clone().unwrap_or_default();
    for route in routes {
        for dest in route.destinations() {
            if let Some(excluded) = exclude
                && Arc::ptr_eq(excluded, dest)
            {
                continue;
            }
            if dest.config().spool_enabled
                && dest.addr() == spec.addr
                && dest.instance() == instance
            {
                return Err(CommandError::SpoolInUse {
                    addr: spec.addr.clone(),
                });
            }
        }
    }
    Ok(())
}

fn position(routes: &[Arc<Route>], key: &str) -> Result<usize, CommandError> {
    routes
        .iter()
        .position(|r| r.key() == key)
        .ok_or_else(|| CommandError::UnknownRoute {
            key: key.to_string(),
        })
}

/// Merge a partial update onto an existing destination's configuration.
fn merge(old: &DestinationConfig, opts: &DestOpts) -> DestSpec {
    DestSpec {
        addr: opts.addr.clone().unwrap_or_else(|| old.addr.clone()),
        instance: Some(old.instance.clone()),
        spool: Some(opts.spool.unwrap_or(old.spool_enabled)),
        pickle: Some(
            opts.pickle
                .unwrap_or(old.format == WireFormat::Pickle),
        ),
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod table_test;
