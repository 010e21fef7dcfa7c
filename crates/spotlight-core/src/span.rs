use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timestamp;

pub type SpanId = String;
pub type TraceId = String;

pub const ORPHAN_OP: &str = "orphan";
pub const ORPHAN_DESCRIPTION: &str = "missing or unknown parent span";

/// A timed unit of work inside a trace. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_ms")]
    pub start_timestamp: f64,
    #[serde(default, deserialize_with = "timestamp::deserialize_ms")]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Span {
    /// Placeholder for a parent that never arrived.
    pub fn orphan(
        span_id: impl Into<SpanId>,
        trace_id: impl Into<TraceId>,
        parent_span_id: Option<SpanId>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id,
            op: Some(ORPHAN_OP.to_string()),
            description: Some(ORPHAN_DESCRIPTION.to_string()),
            start_timestamp: 0.0,
            timestamp: 0.0,
            status: Some("unknown".to_string()),
            tags: None,
            data: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.timestamp - self.start_timestamp
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key)?.as_str()
    }

    /// Thread the span ran on, if the SDK recorded one. Numeric ids are
    /// rendered as strings to match profile thread ids.
    pub fn thread_id(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        let value = data.get("thread.id").or_else(|| data.get("thread_id"))?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Fill in fields that the wire format allows to be absent.
    pub fn normalize(&mut self, trace_id: &str) {
        if self.trace_id.is_empty() {
            self.trace_id = trace_id.to_string();
        }
        // Unfinished spans carry no end; treat them as instantaneous.
        if self.timestamp == 0.0 {
            self.timestamp = self.start_timestamp;
        }
    }
}
