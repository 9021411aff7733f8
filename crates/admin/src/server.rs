//! Admin TCP listener
//!
//! Line-oriented text protocol: each line is one command, each command gets
//! one response block. Mutations answer `ok: ...` or `error: ...`; `view`
//! returns the table rendering; `help` the grammar.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use cinder_routing::Table;

use crate::parse::parse_command;

const HELP: &str = "\
commands:
  addBlack <prefix>
  addRoute sendAllMatch|sendFirstMatch <key> [prefix=X] [sub=Y] [regex=Z] <addr> [spool=BOOL] [pickle=BOOL] ...
  addDest <route-key> <addr> [spool=BOOL] [pickle=BOOL]
  modDest <route-key> <index> [addr=A] [spool=BOOL] [pickle=BOOL]
  modRoute <route-key> [prefix=X] [sub=Y] [regex=Z]
  delRoute <route-key>
  view
  help
";

/// The admin text-protocol server.
pub struct AdminServer {
    table: Arc<Table>,
}

impl AdminServer {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    /// Accept admin connections until cancelled.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) {
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        tracing::info!(addr = %local, "admin listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "admin connection opened");
                        let table = Arc::clone(&self.table);
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(table, stream, conn_cancel).await {
                                tracing::debug!(peer = %peer, error = %e, "admin connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "admin accept error");
                    }
                },
            }
        }

        tracing::info!(addr = %local, "admin listener stopped");
    }
}

async fn handle_connection(
    table: Arc<Table>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut out = BufWriter::new(write_half);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break; // EOF
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match line {
            "help" => HELP.to_string(),
            "view" => table.print(),
            command => match parse_command(command) {
                Ok(command) => match table.apply(command).await {
                    Ok(message) => format!("ok: {message}\n"),
                    Err(e) => format!("error: {e}\n"),
                },
                Err(e) => format!("error: {e}\n"),
            },
        };

        out.write_all(response.as_bytes()).await?;
        out.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;
