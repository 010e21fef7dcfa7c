//! Timestamp normalization
//!
//! SDKs send timestamps either as RFC 3339 strings or as fractional epoch
//! seconds. Everything inside the engine uses fractional epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Convert a wire timestamp into epoch milliseconds.
///
/// Numbers are epoch seconds; strings are parsed as RFC 3339 dates, or as
/// numeric seconds if they look like a number.
pub fn normalize(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|secs| secs * 1000.0),
        Value::String(s) => parse_str(s),
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(to_millis(dt.with_timezone(&Utc)));
    }
    // Some SDKs omit the offset entirely.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(to_millis(naive.and_utc()));
    }
    s.trim().parse::<f64>().ok().map(|secs| secs * 1000.0)
}

/// Epoch milliseconds with sub-millisecond precision.
pub fn to_millis(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_micros() as f64 / 1000.0
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> f64 {
    to_millis(Utc::now())
}

/// Serde helper for a required timestamp field. Missing or unparseable values
/// become `0.0` and are patched up by the caller.
pub fn deserialize_ms<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_opt_ms(deserializer)?.unwrap_or(0.0))
}

/// Serde helper for an optional timestamp field.
pub fn deserialize_opt_ms<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(normalize))
}
