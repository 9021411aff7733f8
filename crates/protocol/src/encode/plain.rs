//! Plain-text encoder

use bytes::BytesMut;

use crate::line::Line;

/// Append a batch of lines, each terminated by `\n`.
pub fn encode_plain(lines: &[Line], out: &mut BytesMut) {
    let total: usize = lines.iter().map(|l| l.len() + 1).sum();
    out.reserve(total);
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\n");
    }
}
