//! Tests for the routing table

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::sleep;

use cinder_metrics::RelayStatusProvider;
use cinder_protocol::Line;

use crate::command::{Command, DestSpec, MatcherSpec};
use crate::route::RouteKind;
use crate::table::{Table, TableConfig};

fn line(s: &str) -> Line {
    Line::from_validated(Bytes::copy_from_slice(s.as_bytes()))
}

fn test_table(dir: &tempfile::TempDir) -> Table {
    let mut config = TableConfig::new(dir.path());
    config.flush_interval = Duration::from_millis(20);
    Table::new(config)
}

/// An address nothing listens on.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn add_route(key: &str, prefix: Option<&str>, dests: Vec<DestSpec>) -> Command {
    Command::AddRoute {
        kind: Some(RouteKind::SendAll),
        key: key.into(),
        matcher: MatcherSpec {
            prefix: prefix.map(String::from),
            ..Default::default()
        },
        dests,
    }
}

/// Wait for `n` lines on the next accepted connection.
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
async fn dispatch_routes_matching_lines_to_destinations() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let reader = tokio::spawn(read_lines(listener, 2));

    table
        .apply(add_route("core", Some("foo."), vec![DestSpec::new(&addr)]))
        .await
        .unwrap();

    table.dispatch(&line("foo.bar 1 1700000000"));
    table.dispatch(&line("foo.baz 2 1700000000"));
    table.dispatch(&line("other.metric 3 1700000000"));

    let received = reader.await.unwrap();
    assert_eq!(
        received,
        vec!["foo.bar 1 1700000000", "foo.baz 2 1700000000"]
    );
    assert_eq!(table.table_status().num_unroutable, 1);
}

#[tokio::test]
async fn dispatch_without_matching_route_only_touches_counters() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);

    table.dispatch(&line("foo.bar 1 2"));
    let status = table.table_status();
    assert_eq!(status.num_unroutable, 1);
    assert_eq!(status.num_blackholed, 0);
    assert!(table.destination_status().is_empty());
}

#[tokio::test]
async fn blacklist_drops_before_routes() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    table
        .apply(Command::AddBlack {
            prefix: "noise.".into(),
        })
        .await
        .unwrap();
    table
        .apply(add_route("all", None, vec![DestSpec::new(&addr)]))
        .await
        .unwrap();

    table.dispatch(&line("noise.cpu 1 2"));
    table.dispatch(&line("signal.cpu 1 2"));

    let status = table.table_status();
    assert_eq!(status.num_blackholed, 1);
    assert_eq!(status.num_blacklist, 1);

    // Only the non-blacklisted line reached the destination queue.
    let dests = table.destination_status();
    assert_eq!(dests.len(), 1);
    assert_eq!(dests[0].queue_depth, 1);
}

#[tokio::test]
async fn send_first_prefers_the_first_connected_destination() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);

    let down = dead_addr().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let up = listener.local_addr().unwrap().to_string();
    let reader = tokio::spawn(read_lines(listener, 5));

    table
        .apply(Command::AddRoute {
            kind: Some(RouteKind::SendFirst),
            key: "failover".into(),
            matcher: MatcherSpec::default(),
            dests: vec![DestSpec::new(&down), DestSpec::new(&up)],
        })
        .await
        .unwrap();

    // Let the second destination connect.
    for _ in 0..50 {
        if table
            .destination_status()
            .iter()
            .any(|d| d.addr == up && d.state == cinder_metrics::ConnectionState::Connected)
        {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    for i in 0..5 {
        table.dispatch(&line(&format!("m.{i} 1 2")));
    }

    let received = reader.await.unwrap();
    assert_eq!(received.len(), 5);

    table.shutdown().await;
}

#[tokio::test]
async fn del_route_shuts_down_its_destinations() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    table
        .apply(add_route("gone", None, vec![DestSpec::new(&addr)]))
        .await
        .unwrap();
    assert_eq!(table.route_count(), 1);

    table
        .apply(Command::DelRoute { key: "gone".into() })
        .await
        .unwrap();
    assert_eq!(table.route_count(), 0);
    assert!(table.destination_status().is_empty());

    // Lines no longer reach any destination.
    table.dispatch(&line("foo.bar 1 2"));
    assert_eq!(table.table_status().num_unroutable, 1);
}

#[tokio::test]
async fn failed_commands_leave_the_table_unchanged() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    // Bad regex.
    let err = table
        .apply(Command::AddRoute {
            kind: None,
            key: "bad".into(),
            matcher: MatcherSpec {
                regex: Some("(unclosed".into()),
                ..Default::default()
            },
            dests: vec![DestSpec::new(&addr)],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unclosed"));
    assert_eq!(table.route_count(), 0);

    // No destinations.
    assert!(table
        .apply(add_route("empty", None, vec![]))
        .await
        .is_err());
    assert_eq!(table.route_count(), 0);

    // Unknown route.
    assert!(table
        .apply(Command::DelRoute {
            key: "missing".into()
        })
        .await
        .is_err());

    // Duplicate key.
    table
        .apply(add_route("dup", None, vec![DestSpec::new(&addr)]))
        .await
        .unwrap();
    assert!(table
        .apply(add_route("dup", None, vec![DestSpec::new(&addr)]))
        .await
        .is_err());
    assert_eq!(table.route_count(), 1);

    table.shutdown().await;
}

#[tokio::test]
async fn two_spooling_destinations_cannot_share_an_identity() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    let spooled = DestSpec {
        addr: addr.clone(),
        instance: None,
        spool: Some(true),
        pickle: None,
    };

    table
        .apply(add_route("r1", None, vec![spooled.clone()]))
        .await
        .unwrap();

    // Same (addr, instance) with spooling in another route is rejected.
    let err = table
        .apply(add_route("r2", None, vec![spooled.clone()]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("spooling destination"));

    // A distinct instance gets its own spool and is fine.
    let other = DestSpec {
        instance: Some("b".into()),
        ..spooled
    };
    table
        .apply(add_route("r2", None, vec![other]))
        .await
        .unwrap();

    table.shutdown().await;
}

#[tokio::test]
async fn first_only_defaults_untyped_routes_to_send_first() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = TableConfig::new(dir.path());
    config.first_only = true;
    let table = Table::new(config);
    let addr = dead_addr().await;

    table
        .apply(Command::AddRoute {
            kind: None,
            key: "defaulted".into(),
            matcher: MatcherSpec::default(),
            dests: vec![DestSpec::new(&addr)],
        })
        .await
        .unwrap();

    assert!(table.print().contains("defaulted sendFirstMatch"));
    table.shutdown().await;
}

#[tokio::test]
async fn mod_route_replaces_the_matcher() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    table
        .apply(add_route("r", Some("old."), vec![DestSpec::new(&addr)]))
        .await
        .unwrap();
    table
        .apply(Command::ModRoute {
            key: "r".into(),
            matcher: MatcherSpec {
                prefix: Some("new.".into()),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    table.dispatch(&line("old.metric 1 2"));
    assert_eq!(table.table_status().num_unroutable, 1);
    table.dispatch(&line("new.metric 1 2"));
    assert_eq!(table.destination_status()[0].queue_depth, 1);

    table.shutdown().await;
}

#[tokio::test]
async fn print_renders_blacklist_and_routes() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);
    let addr = dead_addr().await;

    table
        .apply(Command::AddBlack {
            prefix: "junk.".into(),
        })
        .await
        .unwrap();
    table
        .apply(add_route("core", Some("foo."), vec![DestSpec::new(&addr)]))
        .await
        .unwrap();

    let rendered = table.print();
    assert!(rendered.contains("blacklist:"));
    assert!(rendered.contains("prefix=junk."));
    assert!(rendered.contains("core sendAllMatch [prefix=foo.]"));
    assert!(rendered.contains(&addr));

    table.shutdown().await;
}

#[tokio::test]
async fn dispatch_under_concurrent_reconfiguration_loses_no_line_to_a_half_applied_table() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = std::sync::Arc::new(test_table(&dir));
    let addr = dead_addr().await;

    table
        .apply(add_route("r1", None, vec![DestSpec::new(&addr)]))
        .await
        .unwrap();

    // Hammer dispatch while swapping r1 for r2.
    let dispatcher = {
        let table = std::sync::Arc::clone(&table);
        tokio::spawn(async move {
            for i in 0..2000 {
                table.dispatch(&line(&format!("m.{i} 1 2")));
                if i % 256 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    table
        .apply(Command::DelRoute { key: "r1".into() })
        .await
        .unwrap();
    table
        .apply(add_route("r2", None, vec![DestSpec::new(&addr)]))
        .await
        .unwrap();

    dispatcher.await.unwrap();

    // Every line was observed by exactly one snapshot: either it reached a
    // route (queued or spilled at some destination) or it was counted
    // unroutable in the swap window between delRoute and addRoute.
    let status = table.table_status();
    let queued: u64 = table.destination_status().iter().map(|d| d.queue_depth).sum();
    let dropped: u64 = table
        .destination_status()
        .iter()
        .map(|d| d.num_drop_buff_full)
        .sum();
    assert!(status.num_unroutable + queued + dropped <= 2000);

    table.shutdown().await;
}

#[tokio::test]
async fn counters_are_monotonic() {
    let dir = tempfile::TempDir::new().unwrap();
    let table = test_table(&dir);

    let mut last = 0;
    for i in 0..5 {
        table.dispatch(&line(&format!("m.{i} 1 2")));
        let now = table.table_status().num_unroutable;
        assert!(now >= last);
        last = now;
    }
    assert_eq!(last, 5);
}
