//! Server wiring and lifecycle
//!
//! Startup order: bad-metric store, routing table, init commands (any
//! failure is fatal), listener bind or adoption, ingest tasks, admin and
//! HTTP listeners, instrumentation reporter, pid file.
//!
//! Shutdown order: stop acceptors and readers, then close the table, which
//! cascades into every destination draining its queue into its spool.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cinder_admin::{http_router, parse_command, AdminServer, HttpState};
use cinder_badmetrics::BadMetrics;
use cinder_config::Config;
use cinder_metrics::{GraphiteReporter, GraphiteReporterConfig, IngestMetrics};
use cinder_routing::Table;
use cinder_sources::{bind_udp, IngestPipeline, TcpIngest, UdpIngest};

use crate::restart;

/// Run the relay until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %config.instance,
        "cinder starting"
    );

    let bad_metrics = Arc::new(BadMetrics::new(config.bad_metrics_max_age));
    let ingest_metrics = Arc::new(IngestMetrics::new());
    let table = Arc::new(Table::new(config.table_config()));

    apply_initial_commands(&table, &config).await?;
    for line in table.print().lines() {
        info!("{line}");
    }

    // The TCP listener is either adopted from a restarting parent or bound
    // fresh. A std handle is kept aside so a later restart can hand the
    // descriptor to its own child.
    let std_listener = match restart::inherited_listener()? {
        Some(listener) => {
            info!(addr = %config.listen_addr, "resuming on inherited listener");
            restart::signal_parent_ready();
            listener
        }
        None => {
            let listener = std::net::TcpListener::bind(&config.listen_addr)
                .with_context(|| format!("cannot bind tcp listener on {}", config.listen_addr))?;
            listener.set_nonblocking(true)?;
            listener
        }
    };
    let handoff_listener = std_listener
        .try_clone()
        .context("cannot clone listener for restart handoff")?;
    let tcp_listener =
        TcpListener::from_std(std_listener).context("cannot register listener with runtime")?;

    let udp_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("cannot parse listen_addr '{}'", config.listen_addr))?;
    let udp_socket = bind_udp(udp_addr)
        .with_context(|| format!("cannot bind udp socket on {}", config.listen_addr))?;

    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Ingest.
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&table),
        Arc::clone(&bad_metrics),
        Arc::clone(&ingest_metrics),
        config.validation_level(),
    ));

    {
        let tcp = TcpIngest::new(Arc::clone(&pipeline));
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            tcp.run(tcp_listener, cancel).await;
        }));
    }
    {
        let udp = UdpIngest::new(Arc::clone(&pipeline));
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            udp.run(udp_socket, cancel).await;
        }));
    }

    // Admin text protocol.
    if !config.admin_addr.is_empty() {
        let listener = TcpListener::bind(&config.admin_addr)
            .await
            .with_context(|| format!("cannot bind admin listener on {}", config.admin_addr))?;
        let admin = AdminServer::new(Arc::clone(&table));
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            admin.run(listener, cancel).await;
        }));
    }

    // HTTP status endpoint.
    if !config.http_addr.is_empty() {
        let listener = TcpListener::bind(&config.http_addr)
            .await
            .with_context(|| format!("cannot bind http listener on {}", config.http_addr))?;
        info!(addr = %config.http_addr, "http status endpoint started");
        let router = http_router(HttpState {
            instance: config.instance.clone(),
            table: Arc::clone(&table),
            ingest: Arc::clone(&ingest_metrics),
            bad_metrics: Arc::clone(&bad_metrics),
        });
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "http server error");
            }
        }));
    }

    // Instrumentation reporter.
    if !config.instrumentation.graphite_addr.is_empty() {
        let reporter = GraphiteReporter::new(
            GraphiteReporterConfig {
                addr: config.instrumentation.graphite_addr.clone(),
                interval: Duration::from_millis(config.instrumentation.graphite_interval),
                prefix: format!("cinder.{}", config.instance),
            },
            Arc::clone(&ingest_metrics),
            Arc::clone(&table) as Arc<dyn cinder_metrics::RelayStatusProvider>,
        );
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            reporter.run(cancel).await;
        }));
    }

    write_pid_file(&config.pid_file)?;

    info!(
        listen = %config.listen_addr,
        admin = %or_disabled(&config.admin_addr),
        http = %or_disabled(&config.http_addr),
        validation = %config.validation_level(),
        "cinder running"
    );

    // Wait for a quit signal, restarting in place on SIGHUP.
    loop {
        match wait_for_signal().await {
            Signal::Quit => break,
            Signal::Restart => match restart::spawn_child(&handoff_listener) {
                Ok(child) => {
                    info!(child, "restart: child spawned, draining");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "restart failed, continuing to run");
                }
            },
        }
    }

    info!("shutting down");
    cancel.cancel();

    for task in tasks {
        match tokio::time::timeout(Duration::from_secs(10), task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "task panicked during shutdown"),
            Err(_) => warn!("task did not stop within timeout"),
        }
    }

    // Cascades to every route and destination; queues drain into spools.
    table.shutdown().await;

    remove_pid_file(&config.pid_file);
    info!("cinder shutdown complete");
    Ok(())
}

/// Apply `init` commands, then declarative `[[route]]` entries. Any failure
/// aborts startup.
async fn apply_initial_commands(table: &Table, config: &Config) -> Result<()> {
    for (i, raw) in config.init.iter().enumerate() {
        info!(command = %raw, "applying init command");
        let command = parse_command(raw)
            .with_context(|| format!("cannot parse init command #{}", i + 1))?;
        table
            .apply(command)
            .await
            .with_context(|| format!("cannot apply init command #{}", i + 1))?;
    }

    for entry in &config.routes {
        info!(route = %entry.key, "adding configured route");
        table
            .apply(entry.to_command())
            .await
            .with_context(|| format!("cannot add route '{}'", entry.key))?;
    }

    Ok(())
}

enum Signal {
    Quit,
    Restart,
}

/// Wait for SIGINT/SIGTERM (quit) or SIGHUP (graceful restart).
async fn wait_for_signal() -> Signal {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
            .expect("install SIGHUP handler");

        tokio::select! {
            _ = ctrl_c => Signal::Quit,
            _ = terminate.recv() => Signal::Quit,
            _ = hangup.recv() => Signal::Restart,
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        Signal::Quit
    }
}

fn write_pid_file(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    fs::write(path, format!("{}", std::process::id()))
        .with_context(|| format!("cannot write pid file '{path}'"))
}

fn remove_pid_file(path: &str) {
    if !path.is_empty()
        && let Err(e) = fs::remove_file(path)
    {
        warn!(path = %path, error = %e, "cannot remove pid file");
    }
}

fn or_disabled(addr: &str) -> &str {
    if addr.is_empty() { "(disabled)" } else { addr }
}
