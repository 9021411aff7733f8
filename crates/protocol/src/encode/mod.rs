//! Egress encoders
//!
//! Two wire formats, both batch-oriented: `plain` re-emits the original
//! lines newline-terminated, `pickle` builds a length-prefixed Carbon
//! pickle batch.

mod pickle;
mod plain;

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;

use crate::line::Line;

pub use pickle::encode_pickle;
pub use plain::encode_plain;

/// Wire format a destination speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// Newline-terminated text lines.
    #[default]
    Plain,
    /// Length-prefixed pickle-protocol-2 batches.
    Pickle,
}

impl WireFormat {
    /// Encode a batch of lines into `out`.
    pub fn encode(&self, lines: &[Line], out: &mut BytesMut) {
        match self {
            WireFormat::Plain => encode_plain(lines, out),
            WireFormat::Pickle => encode_pickle(lines, out),
        }
    }

    /// Lowercase name as used in config and dest-specs.
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Plain => "plain",
            WireFormat::Pickle => "pickle",
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(WireFormat::Plain),
            "pickle" => Ok(WireFormat::Pickle),
            other => Err(format!("unknown wire format '{other}'")),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
