//! # Comment List
//!
//! In-memory transforms over the stored list. The proxy treats entries as opaque JSON
//! values and only looks at `timestamp`; [`Comment`] is the typed view the site renders.
//!
//! ## Timestamps
//! - ISO-8601, UTC, millisecond precision, e.g. `2025-01-31T12:00:00.000Z`
//! - Stamped by the proxy, never trusted from the client
//! - Double as the deletion key, so a new stamp is pushed forward one millisecond at a
//!   time until it differs from every stamp already stored
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const MAX_FIELD_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub name: String,
    pub comment: String,
    pub timestamp: String,
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `null`, `false`, `0` and `""` never make it out of a read.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

pub fn decode_list(body: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    let mut list: Vec<Value> = serde_json::from_slice(body)?;
    list.retain(|entry| !is_falsy(entry));

    Ok(list)
}

pub fn encode_list(list: &[Value]) -> Result<Bytes, serde_json::Error> {
    Ok(Bytes::from(serde_json::to_vec(list)?))
}

fn has_timestamp(list: &[Value], timestamp: &str) -> bool {
    list.iter()
        .any(|entry| entry.get(TIMESTAMP_FIELD).and_then(Value::as_str) == Some(timestamp))
}

pub fn unique_timestamp(list: &[Value], now: DateTime<Utc>) -> String {
    let mut candidate = now;
    let mut stamp = format_timestamp(candidate);

    while has_timestamp(list, &stamp) {
        candidate += TimeDelta::milliseconds(1);
        stamp = format_timestamp(candidate);
    }

    stamp
}

/// Stamps `entry` and appends it, returning the stamp.
pub fn append_comment(
    list: &mut Vec<Value>,
    mut entry: Map<String, Value>,
    now: DateTime<Utc>,
) -> String {
    let stamp = unique_timestamp(list, now);
    entry.insert(TIMESTAMP_FIELD.to_string(), Value::String(stamp.clone()));
    list.push(Value::Object(entry));

    stamp
}

/// Drops every entry whose timestamp equals `timestamp`; returns how many went.
pub fn remove_by_timestamp(list: &mut Vec<Value>, timestamp: &Value) -> usize {
    let before = list.len();
    list.retain(|entry| entry.get(TIMESTAMP_FIELD) != Some(timestamp));

    before - list.len()
}

/// Typed view of a raw list; entries missing a field are skipped.
pub fn typed_comments(list: Vec<Value>) -> Vec<Comment> {
    list.into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect()
}
