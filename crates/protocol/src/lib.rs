//! Carbon line protocol
//!
//! A datapoint is a single text line: `<metric_id> <value> <timestamp>`.
//! This crate owns everything about that wire shape:
//!
//! - [`Line`] - a validated datapoint, cheap to clone for fan-out
//! - [`Datapoint`] - the parsed three-field view of a line
//! - [`MetricSchema`] - Legacy / M20 / M20NoEquals classification
//! - [`validate`] - the schema rule matrix, per [`ValidationLevel`]
//! - [`encode`] - plain-text and Carbon pickle batch encoders
//!
//! Parsing and validation are pure; nothing here does I/O.

mod line;
mod schema;
mod validate;

pub mod encode;

pub use line::{Datapoint, Line, MAX_LINE_LENGTH};
pub use schema::MetricSchema;
pub use validate::{validate, ValidationError, ValidationLevel};
