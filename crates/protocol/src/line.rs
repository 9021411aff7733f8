//! Line and datapoint types
//!
//! A [`Line`] wraps the raw bytes of one datapoint (no trailing newline).
//! It is backed by [`Bytes`] so dispatching one line to several destinations
//! is a refcount bump, not a copy.

use bytes::Bytes;

use crate::validate::ValidationError;

/// Maximum accepted line length in bytes.
///
/// Ingest framing consumes and discards anything longer.
pub const MAX_LINE_LENGTH: usize = 4096;

/// One validated Carbon datapoint.
///
/// Constructed by ingest after [`crate::validate`] has accepted the raw
/// bytes; everything downstream of the routing table may assume the three
/// fields are present and parseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    bytes: Bytes,
}

impl Line {
    /// Wrap raw bytes that have already passed validation.
    #[inline]
    pub fn from_validated(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// The raw line bytes, without a trailing newline.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the raw line in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the line is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The metric id (first whitespace-separated field).
    #[inline]
    pub fn metric(&self) -> &[u8] {
        split_fields(&self.bytes).map(|(m, _, _)| m).unwrap_or(b"")
    }

    /// Parse the three-field view of this line.
    #[inline]
    pub fn datapoint(&self) -> Result<Datapoint<'_>, ValidationError> {
        Datapoint::parse(&self.bytes)
    }
}

impl From<Line> for Bytes {
    fn from(line: Line) -> Bytes {
        line.bytes
    }
}

/// Parsed view of one line: metric id, value, timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint<'a> {
    /// The `.`-separated metric id.
    pub metric: &'a [u8],
    /// The sample value (32-bit float range).
    pub value: f32,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

impl<'a> Datapoint<'a> {
    /// Split and parse a raw line into its three fields.
    ///
    /// This checks field structure only; schema rules for the metric id live
    /// in [`crate::validate`].
    pub fn parse(buf: &'a [u8]) -> Result<Self, ValidationError> {
        let (metric, value, timestamp) =
            split_fields(buf).ok_or_else(|| ValidationError::FieldCount {
                got: buf.split(|b| b.is_ascii_whitespace()).filter(|f| !f.is_empty()).count(),
            })?;

        let value = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or(ValidationError::BadValue)?;

        let timestamp = std::str::from_utf8(timestamp)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or(ValidationError::BadTimestamp)?;

        Ok(Self {
            metric,
            value,
            timestamp,
        })
    }
}

/// Split a line into exactly three whitespace-separated fields.
///
/// Returns `None` for any other field count.
fn split_fields(buf: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let mut fields = buf
        .split(|b| b.is_ascii_whitespace())
        .filter(|f| !f.is_empty());

    let metric = fields.next()?;
    let value = fields.next()?;
    let timestamp = fields.next()?;

    if fields.next().is_some() {
        return None;
    }

    Some((metric, value, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_fields() {
        let dp = Datapoint::parse(b"foo.bar 42 1700000000").unwrap();
        assert_eq!(dp.metric, b"foo.bar");
        assert_eq!(dp.value, 42.0);
        assert_eq!(dp.timestamp, 1_700_000_000);
    }

    #[test]
    fn tolerates_repeated_whitespace() {
        let dp = Datapoint::parse(b"foo.bar  42\t1700000000").unwrap();
        assert_eq!(dp.metric, b"foo.bar");
    }

    #[test]
    fn rejects_wrong_field_counts() {
        assert!(matches!(
            Datapoint::parse(b"foo.bar 42"),
            Err(ValidationError::FieldCount { got: 2 })
        ));
        assert!(matches!(
            Datapoint::parse(b"foo.bar 42 1700000000 extra"),
            Err(ValidationError::FieldCount { got: 4 })
        ));
        assert!(matches!(
            Datapoint::parse(b""),
            Err(ValidationError::FieldCount { got: 0 })
        ));
    }

    #[test]
    fn rejects_bad_value_and_timestamp() {
        assert!(matches!(
            Datapoint::parse(b"foo.bar abc 1700000000"),
            Err(ValidationError::BadValue)
        ));
        assert!(matches!(
            Datapoint::parse(b"foo.bar 42 -5"),
            Err(ValidationError::BadTimestamp)
        ));
        assert!(matches!(
            Datapoint::parse(b"foo.bar 42 12.5"),
            Err(ValidationError::BadTimestamp)
        ));
    }

    #[test]
    fn line_metric_accessor() {
        let line = Line::from_validated(Bytes::from_static(b"a.b.c 1 2"));
        assert_eq!(line.metric(), b"a.b.c");
        assert_eq!(line.len(), 9);
    }
}
