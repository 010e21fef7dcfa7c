//! Envelope parsing
//!
//! The Sentry envelope format is a newline-delimited container:
//! ```text
//! {envelope_header}\n
//! {item_header}\n
//! {item_payload}\n
//! {item_header}\n
//! {item_payload}\n
//! ...
//! ```
//!
//! An item header may declare an explicit `length`, in which case exactly that
//! many bytes form the payload, newlines included. Without it the payload runs
//! to the next newline.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use spotlight_core::{SdkInfo, TraceContext};
use std::fmt;
use thiserror::Error;

pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EnvelopeHeader {
    /// Identifier of the event carried by this envelope, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Time the SDK sent the envelope. Unparseable values are dropped rather
    /// than failing the whole header.
    #[serde(
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub sent_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,

    /// Dynamic sampling context shared by every item of the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnvelopeHeader {
    /// The shared trace context, if it names a trace.
    pub fn trace_context(&self) -> Option<TraceContext> {
        let trace = self.trace.clone()?;
        serde_json::from_value(Value::Object(trace)).ok()
    }
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// The type of an envelope item.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    /// Error or message event payload encoded in JSON.
    Event,
    /// Non-standard alias some SDKs use for error events.
    Error,
    /// Transaction event payload encoded in JSON.
    Transaction,
    /// Sampled profile encoded in JSON.
    Profile,
    /// Chunk of a continuous profiling session.
    ProfileChunk,
    /// Container of structured log records.
    Log,
    /// A standalone span.
    Span,
    /// Raw payload of an arbitrary attachment.
    Attachment,
    /// Session update data.
    Session,
    /// Aggregated session data.
    Sessions,
    /// Client internal report (eg: outcomes).
    ClientReport,
    /// Replay metadata and breadcrumb payload.
    ReplayEvent,
    /// Replay recording data.
    ReplayRecording,
    /// Monitor check-in encoded as JSON.
    CheckIn,
    /// User feedback.
    Feedback,
    /// Any type this parser does not know about.
    Other(String),
}

impl ItemType {
    /// Returns the wire name of the item type.
    pub fn name(&self) -> &str {
        match self {
            Self::Event => "event",
            Self::Error => "error",
            Self::Transaction => "transaction",
            Self::Profile => "profile",
            Self::ProfileChunk => "profile_chunk",
            Self::Log => "log",
            Self::Span => "span",
            Self::Attachment => "attachment",
            Self::Session => "session",
            Self::Sessions => "sessions",
            Self::ClientReport => "client_report",
            Self::ReplayEvent => "replay_event",
            Self::ReplayRecording => "replay_recording",
            Self::CheckIn => "check_in",
            Self::Feedback => "feedback",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ItemType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "event" => Self::Event,
            "error" => Self::Error,
            "transaction" => Self::Transaction,
            "profile" => Self::Profile,
            "profile_chunk" => Self::ProfileChunk,
            "log" => Self::Log,
            "span" => Self::Span,
            "attachment" => Self::Attachment,
            "session" => Self::Session,
            "sessions" => Self::Sessions,
            "client_report" => Self::ClientReport,
            "replay_event" => Self::ReplayEvent,
            "replay_recording" => Self::ReplayRecording,
            "check_in" => Self::CheckIn,
            "feedback" => Self::Feedback,
            _ => Self::Other(name),
        }
    }
}

impl From<ItemType> for String {
    fn from(ty: ItemType) -> Self {
        match ty {
            ItemType::Other(name) => name,
            known => known.name().to_string(),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ItemHeader {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<ItemType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Item body: parsed JSON, or the raw bytes when it is not valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(Bytes),
}

impl Payload {
    fn parse(raw: Bytes) -> Self {
        if raw.is_empty() {
            return Payload::Raw(raw);
        }
        match serde_json::from_slice::<Value>(&raw) {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                tracing::debug!("Keeping {} byte item payload as raw bytes: {}", raw.len(), e);
                Payload::Raw(raw)
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.as_json()?.as_object()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Raw(raw) if raw.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeItem {
    pub header: ItemHeader,
    pub payload: Payload,
}

impl EnvelopeItem {
    pub fn ty(&self) -> Option<&ItemType> {
        self.header.ty.as_ref()
    }
}

/// A parsed Sentry envelope. Immutable once parsed.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    header: EnvelopeHeader,
    items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new(header: EnvelopeHeader, items: Vec<EnvelopeItem>) -> Self {
        Self { header, items }
    }

    /// Parse an envelope from a borrowed buffer.
    pub fn from_slice(data: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Parse an envelope. Item payloads are slices of `data`.
    ///
    /// Only a malformed envelope header is an error. Item headers that fail to
    /// parse are skipped, and payloads that are not JSON are kept as raw bytes.
    pub fn from_bytes(data: Bytes) -> Result<Self, EnvelopeError> {
        if data.is_empty() {
            return Ok(Self::default());
        }

        let mut reader = Reader::new(data);

        // 1. Envelope header
        let header_line = reader.next_line();
        let header: EnvelopeHeader =
            serde_json::from_slice(&header_line).map_err(EnvelopeError::InvalidHeader)?;

        // 2. Items
        let mut items = Vec::new();
        while !reader.is_done() {
            let line = reader.next_line();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let item_header = match parse_item_header(&line) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!("{}: {}. Skipping item.", e, source_of(&e));
                    // The length is unknown, so the payload is the next line.
                    reader.next_line();
                    continue;
                }
            };

            let raw = match item_header.length {
                Some(length) => reader.take(length),
                None => reader.next_line(),
            };

            let mut payload = Payload::parse(raw);
            if let (Some(ty), Payload::Json(Value::Object(object))) =
                (item_header.ty.as_ref(), &mut payload)
            {
                object.insert("type".to_string(), Value::String(ty.name().to_string()));
            }

            items.push(EnvelopeItem {
                header: item_header,
                payload,
            });
        }

        Ok(Envelope { header, items })
    }

    /// Get the envelope header
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Iterate over envelope items
    pub fn items(&self) -> impl Iterator<Item = &EnvelopeItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn parse_item_header(line: &[u8]) -> Result<ItemHeader, EnvelopeError> {
    serde_json::from_slice(line).map_err(EnvelopeError::InvalidItemHeader)
}

fn source_of(e: &EnvelopeError) -> String {
    std::error::Error::source(e)
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Cursor over the envelope buffer.
struct Reader {
    data: Bytes,
    pos: usize,
}

impl Reader {
    fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Bytes up to the next newline (exclusive), or to the end of the buffer.
    fn next_line(&mut self) -> Bytes {
        let rest = &self.data[self.pos..];
        let (end, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (self.pos + i, self.pos + i + 1),
            None => (self.data.len(), self.data.len()),
        };
        let mut line = self.data.slice(self.pos..end);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        self.pos = next;
        line
    }

    /// Exactly `length` bytes, or whatever remains if the buffer is truncated.
    /// A single newline terminating the payload is consumed as well.
    fn take(&mut self, length: usize) -> Bytes {
        let end = self.pos.saturating_add(length).min(self.data.len());
        let payload = self.data.slice(self.pos..end);
        self.pos = end;
        if self.data.get(self.pos) == Some(&b'\n') {
            self.pos += 1;
        }
        payload
    }
}
