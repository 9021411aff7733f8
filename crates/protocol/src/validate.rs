//! Line validation
//!
//! `validate` applies the checks in a fixed order and reports the first
//! offending rule: field structure, metric-id schema rules (per level),
//! then value and timestamp parsing. No line partially passes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::line::Datapoint;
use crate::schema::{contains, MetricSchema};

/// How strictly legacy (untagged) metric ids are checked.
///
/// `None` skips all schema rules but still requires three parseable fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Full rule matrix, including the legacy character set.
    #[default]
    Strict,
    /// Legacy character set relaxed; structural rules still apply.
    Medium,
    /// Schema rules skipped entirely.
    None,
}

impl ValidationLevel {
    /// Lowercase name as used in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Strict => "strict",
            ValidationLevel::Medium => "medium",
            ValidationLevel::None => "none",
        }
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(ValidationLevel::Strict),
            "medium" => Ok(ValidationLevel::Medium),
            "none" => Ok(ValidationLevel::None),
            other => Err(format!(
                "invalid validation level '{other}', expected 'strict', 'medium' or 'none'"
            )),
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a line was rejected.
///
/// The variant is the error kind; the display string is the reason recorded
/// by the bad-metric store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected 3 fields, got {got}")]
    FieldCount { got: usize },

    #[error("value field does not parse as a 32-bit float")]
    BadValue,

    #[error("timestamp field does not parse as unsigned seconds")]
    BadTimestamp,

    #[error("empty node in metric id")]
    EmptyNode,

    #[error("illegal character {ch:?} in metric id")]
    IllegalChar { ch: char },

    #[error("mixed = and _is_ tag styles")]
    MixedTagStyles,

    #[error("no unit tag")]
    MissingUnitTag,

    #[error("no target_type tag")]
    MissingTargetTypeTag,

    #[error("need at least one tag beyond unit and target_type")]
    NotEnoughNodes,
}

/// Validate one raw line (without trailing newline).
///
/// Steps, in order: field split, schema classification, schema rules at the
/// given level, value parse, timestamp parse.
pub fn validate(buf: &[u8], level: ValidationLevel) -> Result<(), ValidationError> {
    let mut fields = buf
        .split(|b| b.is_ascii_whitespace())
        .filter(|f| !f.is_empty());

    let metric = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(metric), Some(_), Some(_), None) => metric,
        _ => {
            return Err(ValidationError::FieldCount {
                got: buf
                    .split(|b| b.is_ascii_whitespace())
                    .filter(|f| !f.is_empty())
                    .count(),
            })
        }
    };

    if level != ValidationLevel::None {
        match MetricSchema::of(metric) {
            MetricSchema::Legacy => validate_legacy(metric, level)?,
            MetricSchema::M20 => validate_m20(metric, b"unit=", b"target_type=", true)?,
            MetricSchema::M20NoEquals => {
                validate_m20(metric, b"unit_is_", b"target_type_is_", false)?
            }
        }
    }

    // Field parsing last: the first offending schema rule wins.
    Datapoint::parse(buf).map(|_| ())
}

fn validate_legacy(metric: &[u8], level: ValidationLevel) -> Result<(), ValidationError> {
    if contains(metric, b"..") {
        return Err(ValidationError::EmptyNode);
    }

    if level == ValidationLevel::Strict {
        for &b in metric {
            if !(b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-') {
                return Err(ValidationError::IllegalChar { ch: b as char });
            }
        }
    }

    Ok(())
}

fn validate_m20(
    metric: &[u8],
    unit_tag: &[u8],
    target_type_tag: &[u8],
    equals_style: bool,
) -> Result<(), ValidationError> {
    // An id carrying both delimiters classifies as M20, so only the
    // equals-style branch can observe the mix.
    if equals_style && contains(metric, b"_is_") {
        return Err(ValidationError::MixedTagStyles);
    }

    if !has_tag(metric, unit_tag) {
        return Err(ValidationError::MissingUnitTag);
    }
    if !has_tag(metric, target_type_tag) {
        return Err(ValidationError::MissingTargetTypeTag);
    }

    if metric.iter().filter(|&&b| b == b'.').count() < 2 {
        return Err(ValidationError::NotEnoughNodes);
    }

    Ok(())
}

/// A tag must start a node: either the whole id or right after a dot.
fn has_tag(metric: &[u8], tag: &[u8]) -> bool {
    if metric.starts_with(tag) {
        return true;
    }
    let mut dotted = Vec::with_capacity(tag.len() + 1);
    dotted.push(b'.');
    dotted.extend_from_slice(tag);
    contains(metric, &dotted)
}

#[cfg(test)]
#[path = "validate_test.rs"]
mod validate_test;
