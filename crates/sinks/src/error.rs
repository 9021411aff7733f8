//! Sink error types

use std::io;

use thiserror::Error;

/// Errors surfaced when building or tearing down sinks.
///
/// Runtime connection and write failures are not here: they are local to a
/// destination's writer task, counted and retried, never propagated.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The spool directory or segment files could not be opened.
    #[error("failed to open spool '{name}' under {dir}: {source}")]
    SpoolOpen {
        name: String,
        dir: String,
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
