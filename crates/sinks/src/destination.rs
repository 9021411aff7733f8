//! Destination: one TCP client to one downstream
//!
//! A destination owns a bounded in-memory queue, an optional disk spool and
//! a single writer task. [`Destination::submit`] is the only way in and it
//! never blocks; the writer task is the only consumer of the queue and the
//! spool.
//!
//! # Writer state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (write failure) -> Disconnected
//!      any state -> Closing (shutdown) -> terminal
//! ```
//!
//! Dial failures back off exponentially (100ms doubling to 60s) and the
//! backoff resets on a successful connect.
//!
//! # Ordering
//!
//! Delivery preserves submission order across overflow and downtime through
//! three rules that together keep spool content strictly newer than queue
//! content:
//!
//! - `submit` appends straight to the spool while the spool is non-empty,
//!   so a line never jumps ahead of spooled predecessors;
//! - while disconnected, the writer moves queued lines into the spool during
//!   each backoff wait;
//! - the writer fills each batch from the queue first, then the spool, and a
//!   failed batch is requeued at the spool head before reconnecting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use cinder_metrics::{ConnectionState, DestinationStatus};
use cinder_protocol::encode::WireFormat;
use cinder_protocol::Line;

use crate::error::SinkError;
use crate::spool::{Spool, SpoolConfig};

/// Destination configuration.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Downstream address, host:port.
    pub addr: String,

    /// Instance qualifier; distinguishes several destinations at one
    /// address and namespaces the spool.
    pub instance: String,

    /// Wire format spoken to the downstream.
    pub format: WireFormat,

    /// Maximum wall time between network writes while lines are pending.
    pub flush_interval: Duration,

    /// In-memory queue capacity in lines.
    pub queue_capacity: usize,

    /// Whether overflow and downtime spill to disk.
    pub spool_enabled: bool,

    /// Directory holding this destination's spool segments.
    pub spool_dir: PathBuf,

    /// Dial timeout.
    pub connect_timeout: Duration,

    /// Timeout for one batched write.
    pub write_timeout: Duration,

    /// Maximum lines per network write.
    pub max_batch_lines: usize,

    /// Initial reconnect backoff.
    pub backoff_min: Duration,

    /// Backoff cap.
    pub backoff_max: Duration,
}

impl DestinationConfig {
    /// Config with defaults for everything but the address.
    pub fn new(addr: impl Into<String>, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            addr: addr.into(),
            instance: String::new(),
            format: WireFormat::Plain,
            flush_interval: Duration::from_millis(1000),
            queue_capacity: 10_000,
            spool_enabled: false,
            spool_dir: spool_dir.into(),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            max_batch_lines: 1000,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_secs(60),
        }
    }

    /// Spool file prefix derived from the `(addr, instance)` identity, so a
    /// destination re-created at the same identity adopts the same spool.
    pub fn spool_name(&self) -> String {
        let raw = if self.instance.is_empty() {
            self.addr.clone()
        } else {
            format!("{}_{}", self.addr, self.instance)
        };
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Result of a non-blocking submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued in memory or spooled to disk.
    Accepted,
    /// Queue full and spool disabled or failing.
    Dropped,
}

/// Counters and connection state for one destination.
#[derive(Debug)]
pub struct DestinationMetrics {
    /// Lines written to the downstream.
    pub num_out: AtomicU64,

    /// Failed batched writes.
    pub num_err_write: AtomicU64,

    /// Lines dropped at submit time.
    pub num_drop_buff_full: AtomicU64,

    /// Lines diverted to the spool.
    pub num_spool: AtomicU64,

    state: AtomicU8,
}

impl DestinationMetrics {
    const fn new() -> Self {
        Self {
            num_out: AtomicU64::new(0),
            num_err_write: AtomicU64::new(0),
            num_drop_buff_full: AtomicU64::new(0),
            num_spool: AtomicU64::new(0),
            state: AtomicU8::new(0),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let v = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closing => 3,
        };
        self.state.store(v, Ordering::Relaxed);
    }

    /// Current writer connection state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Relaxed) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// One TCP egress endpoint with its own queue, spool and writer task.
pub struct Destination {
    config: DestinationConfig,
    tx: mpsc::Sender<Line>,
    spool: Option<Arc<Spool>>,
    metrics: Arc<DestinationMetrics>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Destination {
    /// Open the spool (if enabled) and start the writer task.
    pub fn spawn(config: DestinationConfig) -> Result<Arc<Self>, SinkError> {
        let spool = if config.spool_enabled {
            Some(Arc::new(Spool::open(SpoolConfig::new(
                &config.spool_dir,
                config.spool_name(),
            ))?))
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let metrics = Arc::new(DestinationMetrics::new());
        let cancel = CancellationToken::new();

        let writer = Writer {
            config: config.clone(),
            rx,
            spool: spool.clone(),
            metrics: Arc::clone(&metrics),
            cancel: cancel.clone(),
            pending: Vec::new(),
        };
        let handle = tokio::spawn(writer.run());

        Ok(Arc::new(Self {
            config,
            tx,
            spool,
            metrics,
            cancel,
            writer: Mutex::new(Some(handle)),
        }))
    }

    /// Hand one line to this destination without blocking.
    pub fn submit(&self, line: Line) -> SubmitOutcome {
        // Sticky spooling: while the spool holds anything, new lines must go
        // behind it or they would overtake spooled predecessors.
        if let Some(spool) = &self.spool
            && spool.has_queued()
        {
            return self.spool_line(line.as_bytes());
        }

        match self.tx.try_send(line) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(TrySendError::Full(line)) => match &self.spool {
                Some(_) => self.spool_line(line.as_bytes()),
                None => {
                    self.metrics.num_drop_buff_full.fetch_add(1, Ordering::Relaxed);
                    SubmitOutcome::Dropped
                }
            },
            Err(TrySendError::Closed(_)) => {
                // Shutdown already drained the queue; late lines are dropped.
                self.metrics.num_drop_buff_full.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Dropped
            }
        }
    }

    fn spool_line(&self, line: &[u8]) -> SubmitOutcome {
        let spool = self.spool.as_ref().expect("spool enabled");
        match spool.enqueue(line) {
            Ok(()) => {
                self.metrics.num_spool.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Accepted
            }
            Err(e) => {
                self.metrics.num_drop_buff_full.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    dest = %self.config.addr,
                    error = %e,
                    "spool append failed, line dropped"
                );
                SubmitOutcome::Dropped
            }
        }
    }

    /// Downstream address.
    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    /// Instance qualifier.
    pub fn instance(&self) -> &str {
        &self.config.instance
    }

    /// Destination configuration.
    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Counters for this destination.
    pub fn metrics(&self) -> &DestinationMetrics {
        &self.metrics
    }

    /// Whether the writer currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.metrics.state() == ConnectionState::Connected
    }

    /// Build a status snapshot, attributed to the owning route.
    pub fn status(&self, route_key: &str) -> DestinationStatus {
        let capacity = self.tx.max_capacity() as u64;
        let depth = capacity - self.tx.capacity() as u64;
        DestinationStatus {
            route_key: route_key.to_string(),
            addr: self.config.addr.clone(),
            instance: self.config.instance.clone(),
            state: self.metrics.state(),
            queue_depth: depth,
            queue_capacity: capacity,
            num_out: self.metrics.num_out.load(Ordering::Relaxed),
            num_err_write: self.metrics.num_err_write.load(Ordering::Relaxed),
            num_drop_buff_full: self.metrics.num_drop_buff_full.load(Ordering::Relaxed),
            num_spool: self.metrics.num_spool.load(Ordering::Relaxed),
        }
    }

    /// Initiate drain and wait for the writer to exit.
    ///
    /// The writer moves every queued line into the spool (when enabled) and
    /// closes the spool before returning.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.writer.lock().expect("writer handle lock").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(
                    dest = %self.config.addr,
                    error = %e,
                    "destination writer panicked during shutdown"
                );
            }
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("addr", &self.config.addr)
            .field("instance", &self.config.instance)
            .field("format", &self.config.format)
            .field("state", &self.metrics.state())
            .finish()
    }
}

/// The single writer task behind one destination.
struct Writer {
    config: DestinationConfig,
    rx: mpsc::Receiver<Line>,
    spool: Option<Arc<Spool>>,
    metrics: Arc<DestinationMetrics>,
    cancel: CancellationToken,
    /// Batch in hand when shutdown interrupted the write loop; drained
    /// ahead of the queue so order is kept.
    pending: Vec<Line>,
}

impl Writer {
    async fn run(mut self) {
        tracing::debug!(dest = %self.config.addr, "destination writer starting");

        loop {
            let Some(mut stream) = self.connect().await else {
                break;
            };
            self.metrics.set_state(ConnectionState::Connected);
            tracing::debug!(dest = %self.config.addr, "connected");

            if self.write_loop(&mut stream).await {
                break;
            }
            self.metrics.set_state(ConnectionState::Disconnected);
        }

        self.metrics.set_state(ConnectionState::Closing);
        self.drain();
        if let Some(spool) = &self.spool
            && let Err(e) = spool.close()
        {
            tracing::warn!(dest = %self.config.addr, error = %e, "spool close failed");
        }

        tracing::debug!(dest = %self.config.addr, "destination writer stopped");
    }

    /// Dial with exponential backoff. Returns `None` when cancelled.
    async fn connect(&mut self) -> Option<TcpStream> {
        let mut backoff = self.config.backoff_min;

        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            self.metrics.set_state(ConnectionState::Connecting);

            let dial = timeout(
                self.config.connect_timeout,
                TcpStream::connect(&self.config.addr),
            );
            match dial.await {
                Ok(Ok(stream)) => {
                    configure_socket(&stream, &self.config);
                    return Some(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(
                        dest = %self.config.addr,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "dial failed"
                    );
                }
                Err(_) => {
                    tracing::debug!(
                        dest = %self.config.addr,
                        backoff_ms = backoff.as_millis() as u64,
                        "dial timed out"
                    );
                }
            }

            self.metrics.set_state(ConnectionState::Disconnected);
            if self.backoff_wait(backoff).await {
                return None;
            }
            backoff = (backoff * 2).min(self.config.backoff_max);
        }
    }

    /// Wait out one backoff window, moving queue content to the head of the
    /// spool while we are down.
    ///
    /// Queued lines predate everything in the spool (sticky submission sends
    /// new lines straight to the spool once it is non-empty), so they belong
    /// in front. Each drain takes the whole queue at once to keep its
    /// internal order.
    async fn backoff_wait(&mut self, duration: Duration) -> bool {
        let cancel = self.cancel.clone();
        let deadline = Instant::now() + duration;

        loop {
            if self.spool.is_some() {
                tokio::select! {
                    _ = cancel.cancelled() => return true,
                    _ = sleep_until(deadline) => return false,
                    line = self.rx.recv() => match line {
                        Some(line) => {
                            let mut batch = vec![line];
                            while let Ok(line) = self.rx.try_recv() {
                                batch.push(line);
                            }
                            self.requeue_or_drop(batch);
                        }
                        None => return true,
                    },
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return true,
                    _ = sleep_until(deadline) => return false,
                }
            }
        }
    }

    /// Write batches until the connection fails or shutdown begins.
    ///
    /// Returns true when the writer should terminate.
    async fn write_loop(&mut self, stream: &mut TcpStream) -> bool {
        let cancel = self.cancel.clone();

        loop {
            let mut batch: Vec<Line> = Vec::new();
            self.fill_batch(&mut batch);

            if batch.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return true,
                    line = self.rx.recv() => match line {
                        Some(line) => batch.push(line),
                        None => return true,
                    },
                    // Periodic wakeup so spool content left behind by a
                    // requeue or a restart drains even when ingest is idle.
                    _ = sleep(self.config.flush_interval) => continue,
                }
            }

            // Accumulate up to the flush interval unless already full.
            if batch.len() < self.config.max_batch_lines {
                let deadline = Instant::now() + self.config.flush_interval;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.pending = batch;
                            return true;
                        }
                        _ = sleep_until(deadline) => break,
                        line = self.rx.recv() => match line {
                            Some(line) => {
                                batch.push(line);
                                if batch.len() >= self.config.max_batch_lines {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            }

            match self.write_batch(stream, &batch).await {
                Ok(()) => {
                    self.metrics
                        .num_out
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.num_err_write.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        dest = %self.config.addr,
                        lines = batch.len(),
                        error = %e,
                        "batch write failed, reconnecting"
                    );
                    // The failed batch plus whatever is queued behind it go
                    // to the spool head in one requeue, ahead of newer
                    // spooled lines.
                    let mut unsent = batch;
                    while let Ok(line) = self.rx.try_recv() {
                        unsent.push(line);
                    }
                    self.requeue_or_drop(unsent);
                    return false;
                }
            }
        }
    }

    /// Fill a batch: queue first, then spool.
    ///
    /// Sticky submission keeps the spool strictly newer than the queue, so
    /// this order is submission order.
    fn fill_batch(&mut self, batch: &mut Vec<Line>) {
        while batch.len() < self.config.max_batch_lines {
            match self.rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        if let Some(spool) = &self.spool {
            while batch.len() < self.config.max_batch_lines {
                match spool.dequeue() {
                    Ok(Some(bytes)) => batch.push(Line::from_validated(bytes)),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(
                            dest = %self.config.addr,
                            error = %e,
                            "spool read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Encode and send one batch as a single write.
    async fn write_batch(
        &self,
        stream: &mut TcpStream,
        batch: &[Line],
    ) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        self.config.format.encode(batch, &mut buf);

        timeout(self.config.write_timeout, async {
            stream.write_all(&buf).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
    }

    /// Put an unsent batch back at the spool head; without a spool the batch
    /// is lost and logged.
    fn requeue_or_drop(&self, batch: Vec<Line>) {
        if batch.is_empty() {
            return;
        }
        match &self.spool {
            Some(spool) => {
                let lines: Vec<Bytes> = batch.into_iter().map(Bytes::from).collect();
                self.metrics
                    .num_spool
                    .fetch_add(lines.len() as u64, Ordering::Relaxed);
                spool.requeue_front(lines);
            }
            None => {
                tracing::warn!(
                    dest = %self.config.addr,
                    lines = batch.len(),
                    "unsent batch lost (spool disabled)"
                );
            }
        }
    }

    /// Final drain: the interrupted batch, then everything still queued,
    /// goes into the spool ahead of whatever the spool already holds.
    fn drain(&mut self) {
        self.rx.close();

        let mut queued: Vec<Bytes> =
            std::mem::take(&mut self.pending).into_iter().map(Bytes::from).collect();
        while let Ok(line) = self.rx.try_recv() {
            queued.push(Bytes::from(line));
        }

        if queued.is_empty() {
            return;
        }

        match &self.spool {
            Some(spool) => {
                self.metrics
                    .num_spool
                    .fetch_add(queued.len() as u64, Ordering::Relaxed);
                spool.requeue_front(queued);
            }
            None => {
                tracing::info!(
                    dest = %self.config.addr,
                    lines = queued.len(),
                    "queued lines lost at shutdown (spool disabled)"
                );
            }
        }
    }
}

/// Set TCP_NODELAY and keepalive; failures are non-fatal.
fn configure_socket(stream: &TcpStream, config: &DestinationConfig) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(dest = %config.addr, error = %e, "failed to set TCP_NODELAY");
    }

    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        tracing::debug!(dest = %config.addr, error = %e, "failed to set TCP keepalive");
    }
}

#[cfg(test)]
#[path = "destination_test.rs"]
mod destination_test;
