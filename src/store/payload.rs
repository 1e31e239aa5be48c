//! Point payloads: schema-open metadata maps.
//!
//! A payload is an ordered mapping from string keys to JSON-style values.
//! Typical keys are `file_path`, `language`, `line_start`, `line_end`,
//! `content`, plus arbitrary domain tags. Filters match against payloads
//! exclusively; they never consult index internals.

use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered key/value metadata attached to a point.
pub type Payload = BTreeMap<String, Value>;

/// Text view of a payload value, for substring/prefix/glob matching.
///
/// Only strings participate in text matching; numbers and other variants
/// return `None` rather than being coerced.
#[must_use]
pub fn value_text(value: &Value) -> Option<&str> {
    value.as_str()
}

/// Numeric view of a payload value, for range matching.
///
/// Integers and floats both participate; strings are not parsed.
#[must_use]
pub fn value_number(value: &Value) -> Option<f64> {
    value.as_f64()
}
