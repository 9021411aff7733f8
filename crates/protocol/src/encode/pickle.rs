//! Carbon pickle batch encoder
//!
//! Emits the frame the Carbon pickle receiver expects: a 4-byte big-endian
//! length prefix followed by a pickle-protocol-2 object of shape
//! `[(metric, (timestamp, value)), ...]`.
//!
//! The opcode sequence is fixed:
//!
//! ```text
//! PROTO 2, EMPTY_LIST, MARK,
//!   { SHORT_BINSTRING|BINSTRING metric, BININT|LONG1 ts, BINFLOAT value,
//!     TUPLE2, TUPLE2 }*,
//! APPENDS, STOP
//! ```

use bytes::{BufMut, BytesMut};

use crate::line::Line;

const PROTO: u8 = 0x80;
const EMPTY_LIST: u8 = b']';
const MARK: u8 = b'(';
const SHORT_BINSTRING: u8 = b'U';
const BINSTRING: u8 = b'T';
const BININT: u8 = b'J';
const LONG1: u8 = 0x8a;
const BINFLOAT: u8 = b'G';
const TUPLE2: u8 = 0x86;
const APPENDS: u8 = b'e';
const STOP: u8 = b'.';

/// Encode a batch of validated lines as one length-prefixed pickle frame.
pub fn encode_pickle(lines: &[Line], out: &mut BytesMut) {
    let mut body = BytesMut::with_capacity(lines.iter().map(|l| l.len() + 16).sum::<usize>() + 8);

    body.put_u8(PROTO);
    body.put_u8(2);
    body.put_u8(EMPTY_LIST);
    body.put_u8(MARK);

    for line in lines {
        // Lines reaching an encoder have passed validation; a parse failure
        // here would mean a framing bug upstream, so the line is skipped
        // rather than poisoning the whole batch.
        let Ok(point) = line.datapoint() else {
            continue;
        };

        put_string(&mut body, point.metric);
        put_int(&mut body, point.timestamp);
        body.put_u8(BINFLOAT);
        body.put_f64(f64::from(point.value));
        body.put_u8(TUPLE2); // (timestamp, value)
        body.put_u8(TUPLE2); // (metric, (timestamp, value))
    }

    body.put_u8(APPENDS);
    body.put_u8(STOP);

    out.reserve(4 + body.len());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
}

fn put_string(out: &mut BytesMut, s: &[u8]) {
    if s.len() < 256 {
        out.put_u8(SHORT_BINSTRING);
        out.put_u8(s.len() as u8);
    } else {
        out.put_u8(BINSTRING);
        out.put_u32_le(s.len() as u32);
    }
    out.extend_from_slice(s);
}

fn put_int(out: &mut BytesMut, v: u64) {
    if v <= i32::MAX as u64 {
        out.put_u8(BININT);
        out.put_i32_le(v as i32);
    } else {
        // Minimal little-endian two's-complement, padded with a zero byte
        // when the top bit would read as a sign.
        let le = v.to_le_bytes();
        let core = le.iter().rposition(|&b| b != 0).map_or(1, |p| p + 1);
        let pad = le[core - 1] & 0x80 != 0;
        out.put_u8(LONG1);
        out.put_u8((core + usize::from(pad)) as u8);
        out.extend_from_slice(&le[..core]);
        if pad {
            out.put_u8(0);
        }
    }
}

#[cfg(test)]
#[path = "pickle_test.rs"]
mod pickle_test;
