//! Tests for TCP ingest

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use cinder_badmetrics::BadMetrics;
use cinder_metrics::IngestMetrics;
use cinder_protocol::ValidationLevel;
use cinder_routing::{Command, DestSpec, MatcherSpec, RouteKind, Table, TableConfig};

use crate::pipeline::IngestPipeline;
use crate::tcp::TcpIngest;

/// Full ingest stack wired to one downstream listener.
struct Harness {
    ingest_addr: String,
    pipeline: Arc<IngestPipeline>,
    bad_metrics: Arc<BadMetrics>,
    table: Arc<Table>,
    cancel: CancellationToken,
}

async fn harness(
    dir: &tempfile::TempDir,
    downstream: &str,
    level: ValidationLevel,
) -> Harness {
    let mut table_config = TableConfig::new(dir.path());
    table_config.flush_interval = Duration::from_millis(20);
    let table = Arc::new(Table::new(table_config));

    table
        .apply(Command::AddRoute {
            kind: Some(RouteKind::SendAll),
            key: "all".into(),
            matcher: MatcherSpec::default(),
            dests: vec![DestSpec::new(downstream)],
        })
        .await
        .unwrap();

    let bad_metrics = Arc::new(BadMetrics::new(Duration::from_secs(60)));
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&table),
        Arc::clone(&bad_metrics),
        Arc::new(IngestMetrics::new()),
        level,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingest_addr = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();

    let ingest = TcpIngest::new(Arc::clone(&pipeline));
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        ingest.run(listener, run_cancel).await;
    });

    Harness {
        ingest_addr,
        pipeline,
        bad_metrics,
        table,
        cancel,
    }
}

async fn read_lines(listener: TcpListener, n: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            out.push(line);
            if out.len() == n {
                break;
            }
        }
    }
    out
}

#[tokio::test]
async fn valid_lines_flow_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap().to_string();
    let reader = tokio::spawn(read_lines(downstream, 1));

    let h = harness(&dir, &downstream_addr, ValidationLevel::Strict).await;

    let mut client = TcpStream::connect(&h.ingest_addr).await.unwrap();
    client
        .write_all(b"foo.unit=B.target_type=count.host=a 42 1700000000\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let received = reader.await.unwrap();
    assert_eq!(received, vec!["foo.unit=B.target_type=count.host=a 42 1700000000"]);
    assert_eq!(h.pipeline.metrics().snapshot().num_in, 1);

    h.cancel.cancel();
    h.table.shutdown().await;
}

#[tokio::test]
async fn invalid_lines_are_recorded_not_dispatched() {
    let dir = tempfile::TempDir::new().unwrap();
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap().to_string();

    let h = harness(&dir, &downstream_addr, ValidationLevel::Strict).await;

    let mut client = TcpStream::connect(&h.ingest_addr).await.unwrap();
    // Tagged metric without a unit tag, and a malformed line.
    client
        .write_all(b"foo.sub=x.target_type=count.h=a 42 1700000000\nnot enough\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    // Wait for the reader task to process both lines.
    for _ in 0..100 {
        if h.pipeline.metrics().snapshot().num_invalid == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let snap = h.pipeline.metrics().snapshot();
    assert_eq!(snap.num_in, 2);
    assert_eq!(snap.num_invalid, 2);

    let bad = h.bad_metrics.snapshot();
    assert_eq!(bad.len(), 2);
    assert!(bad.iter().any(|r| r.reason == "no unit tag"));

    h.cancel.cancel();
    h.table.shutdown().await;
}

#[tokio::test]
async fn oversized_lines_are_discarded_and_counted() {
    let dir = tempfile::TempDir::new().unwrap();
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap().to_string();
    let reader = tokio::spawn(read_lines(downstream, 1));

    let h = harness(&dir, &downstream_addr, ValidationLevel::None).await;

    let mut client = TcpStream::connect(&h.ingest_addr).await.unwrap();
    let huge = format!("{} 1 2\n", "x".repeat(8000));
    client.write_all(huge.as_bytes()).await.unwrap();
    client.write_all(b"after.huge 1 1700000000\n").await.unwrap();
    client.shutdown().await.unwrap();

    // The line after the oversized one still flows.
    let received = reader.await.unwrap();
    assert_eq!(received, vec!["after.huge 1 1700000000"]);

    let snap = h.pipeline.metrics().snapshot();
    assert_eq!(snap.num_err_truncated, 1);
    assert_eq!(snap.num_in, 1);

    h.cancel.cancel();
    h.table.shutdown().await;
}

#[tokio::test]
async fn trailing_partial_line_at_eof_is_discarded() {
    let dir = tempfile::TempDir::new().unwrap();
    let downstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let downstream_addr = downstream.local_addr().unwrap().to_string();

    let h = harness(&dir, &downstream_addr, ValidationLevel::None).await;

    let mut client = TcpStream::connect(&h.ingest_addr).await.unwrap();
    client.write_all(b"complete.line 1 2\npartial.line 3").await.unwrap();
    client.shutdown().await.unwrap();

    for _ in 0..100 {
        if h.pipeline.metrics().snapshot().num_in == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.pipeline.metrics().snapshot().num_in, 1);

    h.cancel.cancel();
    h.table.shutdown().await;
}
