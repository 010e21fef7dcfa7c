//! Typed telemetry events
//!
//! Envelope items are classified into one of four kinds and deserialized into
//! the matching variant of [`Event`]. Every struct keeps the fields it does not
//! model in a flattened `extra` map, so nothing the SDK sent is lost.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::EventError;
use crate::profile::ProfileEvent;
use crate::sdk::SdkInfo;
use crate::span::{Span, TraceId};
use crate::timestamp;

/// Kind of telemetry carried by an envelope item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Transaction,
    Profile,
    Log,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Transaction => "transaction",
            Self::Profile => "profile",
            Self::Log => "log",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every event kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCommon {
    #[serde(default)]
    pub event_id: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_ms")]
    pub timestamp: f64,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkInfo>,
    #[serde(default, skip_serializing_if = "Contexts::is_empty")]
    pub contexts: Contexts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contexts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Contexts {
    pub fn is_empty(&self) -> bool {
        self.trace.is_none() && self.other.is_empty()
    }
}

/// `contexts.trace` of an event, or the shared `trace` header of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single stack frame. Used for exception stack traces and profile frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_context: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// File the frame points into, preferring the absolute path.
    pub fn location(&self) -> Option<&str> {
        self.abs_path.as_deref().or(self.filename.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionList {
    #[serde(default)]
    pub values: Vec<Exception>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(default)]
    pub exception: ExceptionList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorEvent {
    /// SDKs report frames innermost-first; consumers expect outermost-first.
    pub fn reverse_frames(&mut self) {
        for exception in &mut self.exception.values {
            if let Some(stacktrace) = exception.stacktrace.as_mut() {
                stacktrace.frames.reverse();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, deserialize_with = "deserialize_spans")]
    pub spans: Vec<Span>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionEvent {
    /// The span the transaction itself represents, built from its trace context.
    pub fn root_span(&self) -> Option<Span> {
        let trace = self.common.contexts.trace.as_ref()?;
        let span_id = trace.span_id.clone()?;
        Some(Span {
            trace_id: trace.trace_id.clone(),
            span_id,
            parent_span_id: trace.parent_span_id.clone(),
            op: trace.op.clone(),
            description: self.transaction.clone(),
            start_timestamp: self.common.start_timestamp.unwrap_or(self.common.timestamp),
            timestamp: self.common.timestamp,
            status: trace.status.clone(),
            tags: self
                .extra
                .get("tags")
                .and_then(Value::as_object)
                .cloned(),
            data: trace.data.clone(),
        })
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.common
            .contexts
            .trace
            .as_ref()
            .and_then(|trace| trace.parent_span_id.as_deref())
    }
}

/// Skip spans that fail to deserialize instead of rejecting the whole
/// transaction.
fn deserialize_spans<'de, D>(deserializer: D) -> Result<Vec<Span>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Span>(value) {
            Ok(span) => Some(span),
            Err(e) => {
                tracing::warn!("Dropping malformed span: {}", e);
                None
            }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_number: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A normalized telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    Error(ErrorEvent),
    Transaction(TransactionEvent),
    Profile(ProfileEvent),
    Log(LogEvent),
}

impl Event {
    /// Deserialize a classified item payload. Log containers (`{"items": [...]}`)
    /// expand into one event per entry; entries that fail to deserialize are
    /// skipped.
    pub fn from_payload(kind: EventKind, payload: Value) -> Result<Vec<Event>, EventError> {
        match kind {
            EventKind::Error => Ok(vec![Event::Error(serde_json::from_value(payload)?)]),
            EventKind::Transaction => {
                Ok(vec![Event::Transaction(serde_json::from_value(payload)?)])
            }
            EventKind::Profile => Ok(vec![Event::Profile(serde_json::from_value(payload)?)]),
            EventKind::Log => match payload {
                Value::Object(mut container) if container.contains_key("items") => {
                    let items = match container.remove("items") {
                        Some(Value::Array(items)) => items,
                        _ => return Err(EventError::InvalidLogContainer),
                    };
                    Ok(items
                        .into_iter()
                        .filter_map(|item| match serde_json::from_value::<LogEvent>(item) {
                            Ok(log) => Some(Event::Log(log)),
                            Err(e) => {
                                tracing::warn!("Dropping malformed log entry: {}", e);
                                None
                            }
                        })
                        .collect())
                }
                other => Ok(vec![Event::Log(serde_json::from_value(other)?)]),
            },
            EventKind::Unknown => Err(EventError::UnsupportedKind),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Error(_) => EventKind::Error,
            Self::Transaction(_) => EventKind::Transaction,
            Self::Profile(_) => EventKind::Profile,
            Self::Log(_) => EventKind::Log,
        }
    }

    pub fn common(&self) -> &EventCommon {
        match self {
            Self::Error(e) => &e.common,
            Self::Transaction(e) => &e.common,
            Self::Profile(e) => &e.common,
            Self::Log(e) => &e.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut EventCommon {
        match self {
            Self::Error(e) => &mut e.common,
            Self::Transaction(e) => &mut e.common,
            Self::Profile(e) => &mut e.common,
            Self::Log(e) => &mut e.common,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.common().event_id
    }

    pub fn timestamp(&self) -> f64 {
        self.common().timestamp
    }

    /// Start of the event, falling back to its timestamp for point-in-time events.
    pub fn start_timestamp(&self) -> f64 {
        self.common().start_timestamp.unwrap_or(self.timestamp())
    }

    pub fn platform(&self) -> Option<&str> {
        self.common().platform.as_deref()
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.common().contexts.trace.as_ref()
    }

    /// Trace the event belongs to, including the top-level `trace_id` of logs.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Log(log) => log
                .trace_id
                .as_deref()
                .or_else(|| self.trace_context().map(|t| t.trace_id.as_str())),
            _ => self.trace_context().map(|t| t.trace_id.as_str()),
        }
    }

    pub fn as_transaction(&self) -> Option<&TransactionEvent> {
        match self {
            Self::Transaction(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Assign a fresh id when the SDK sent none. Returns the id in use.
    pub fn ensure_event_id(&mut self) -> &str {
        let common = self.common_mut();
        if common.event_id.is_empty() {
            common.event_id = uuid::Uuid::new_v4().simple().to_string();
        }
        &common.event_id
    }

    /// Patch timestamps the SDK left out so every event has a usable time range.
    pub fn normalize_timestamps(&mut self, now_ms: f64) {
        let common = self.common_mut();
        if common.timestamp == 0.0 {
            common.timestamp = common.start_timestamp.unwrap_or(now_ms);
        }
    }
}
