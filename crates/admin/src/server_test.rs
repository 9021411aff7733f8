//! Tests for the admin TCP listener

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use cinder_routing::{Table, TableConfig};

use crate::server::AdminServer;

async fn start_admin(dir: &tempfile::TempDir) -> (Arc<Table>, String, CancellationToken) {
    let table = Arc::new(Table::new(TableConfig::new(dir.path())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();

    let server = AdminServer::new(Arc::clone(&table));
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        server.run(listener, run_cancel).await;
    });

    (table, addr, cancel)
}

async fn send_line(stream: &mut TcpStream, line: &str) -> String {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    response
}

/// An address nothing listens on.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn commands_mutate_the_table() {
    let dir = tempfile::TempDir::new().unwrap();
    let (table, addr, cancel) = start_admin(&dir).await;
    let dest = dead_addr().await;

    let mut client = TcpStream::connect(&addr).await.unwrap();

    let response = send_line(&mut client, &format!("addRoute sendAllMatch core {dest}")).await;
    assert!(response.starts_with("ok:"), "got {response}");
    assert_eq!(table.route_count(), 1);

    let response = send_line(&mut client, "delRoute core").await;
    assert!(response.starts_with("ok:"), "got {response}");
    assert_eq!(table.route_count(), 0);

    cancel.cancel();
}

#[tokio::test]
async fn bad_commands_return_errors_without_side_effects() {
    let dir = tempfile::TempDir::new().unwrap();
    let (table, addr, cancel) = start_admin(&dir).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();

    let response = send_line(&mut client, "delRoute nope").await;
    assert!(response.starts_with("error:"), "got {response}");

    let response = send_line(&mut client, "explode").await;
    assert!(response.starts_with("error:"), "got {response}");
    assert_eq!(table.route_count(), 0);

    cancel.cancel();
}

#[tokio::test]
async fn view_renders_the_table() {
    let dir = tempfile::TempDir::new().unwrap();
    let (_table, addr, cancel) = start_admin(&dir).await;

    let mut client = TcpStream::connect(&addr).await.unwrap();
    client.write_all(b"view\n").await.unwrap();

    let mut reader = BufReader::new(&mut client);
    let mut first = String::new();
    reader.read_line(&mut first).await.unwrap();
    assert!(first.contains("spool dir:"), "got {first}");

    cancel.cancel();
}
