//! Profiling samples
//!
//! [`ProfileEvent`] mirrors the v1 sampled-profile wire format. [`Profile`] is
//! the form the store keeps per trace: sample times converted to absolute
//! milliseconds and stacks reordered root-first.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::event::{EventCommon, Frame};
use crate::span::TraceId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub transactions: Vec<ProfileTransaction>,
    /// Older SDKs send a single transaction instead of a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<ProfileTransaction>,
    pub profile: ProfileData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub trace_id: TraceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub samples: Vec<WireSample>,
    #[serde(default)]
    pub stacks: Vec<Vec<usize>>,
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSample {
    pub stack_id: usize,
    #[serde(deserialize_with = "deserialize_id")]
    pub thread_id: String,
    #[serde(deserialize_with = "deserialize_ns")]
    pub elapsed_since_start_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

/// A sample placed on the absolute timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSample {
    pub stack_id: usize,
    pub thread_id: String,
    pub start_timestamp: f64,
}

/// Profile attached to a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub platform: String,
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
    /// Sorted by `start_timestamp`.
    pub samples: Vec<ProfileSample>,
    pub frames: Vec<Frame>,
    /// Frame indices, root-first.
    pub stacks: Vec<Vec<usize>>,
    pub timestamp: f64,
    pub active_thread_id: Option<String>,
}

impl ProfileEvent {
    /// Every transaction the profile covers, whichever form the SDK used.
    pub fn profiled_transactions(&self) -> impl Iterator<Item = &ProfileTransaction> {
        self.transactions.iter().chain(self.transaction.iter())
    }

    /// Place samples on the absolute timeline starting at `base_ms`.
    pub fn to_profile(&self, base_ms: f64, transaction: &ProfileTransaction) -> Profile {
        let mut samples: Vec<ProfileSample> = self
            .profile
            .samples
            .iter()
            .map(|sample| ProfileSample {
                stack_id: sample.stack_id,
                thread_id: sample.thread_id.clone(),
                start_timestamp: base_ms + (sample.elapsed_since_start_ns / 1_000_000) as f64,
            })
            .collect();
        samples.sort_by(|a, b| a.start_timestamp.total_cmp(&b.start_timestamp));

        let stacks = self
            .profile
            .stacks
            .iter()
            .map(|stack| stack.iter().rev().copied().collect())
            .collect();

        Profile {
            platform: self.common.platform.clone().unwrap_or_default(),
            thread_metadata: self.profile.thread_metadata.clone(),
            samples,
            frames: self.profile.frames.clone(),
            stacks,
            timestamp: base_ms,
            active_thread_id: transaction.active_thread_id.clone(),
        }
    }
}

impl Profile {
    pub fn thread_name(&self, thread_id: &str) -> Option<&str> {
        self.thread_metadata.get(thread_id)?.name.as_deref()
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(value).ok_or_else(|| serde::de::Error::custom("expected string or number id"))
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(id_from_value))
}

fn deserialize_ns<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .ok_or_else(|| serde::de::Error::custom("invalid nanosecond offset")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid nanosecond offset: {}", e))),
        _ => Err(serde::de::Error::custom("invalid nanosecond offset")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_profile() -> ProfileEvent {
        serde_json::from_value(json!({
            "event_id": "p1",
            "version": "1",
            "platform": "python",
            "timestamp": 100.0,
            "transactions": [{"id": "tx1", "trace_id": "t1", "active_thread_id": 7}],
            "profile": {
                "samples": [
                    {"stack_id": 1, "thread_id": "7", "elapsed_since_start_ns": "25000000"},
                    {"stack_id": 0, "thread_id": 7, "elapsed_since_start_ns": 10999999}
                ],
                "stacks": [[2, 1, 0], [1, 0]],
                "frames": [{"function": "main"}, {"function": "handle"}, {"function": "query"}],
                "thread_metadata": {"7": {"name": "MainThread"}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn converts_to_absolute_root_first_profile() {
        let event = wire_profile();
        let transaction = event.profiled_transactions().next().unwrap().clone();
        assert_eq!(transaction.active_thread_id.as_deref(), Some("7"));

        let profile = event.to_profile(100_000.0, &transaction);
        assert_eq!(profile.platform, "python");
        assert_eq!(profile.samples[0].start_timestamp, 100_010.0);
        assert_eq!(profile.samples[0].stack_id, 0);
        assert_eq!(profile.samples[1].start_timestamp, 100_025.0);
        assert_eq!(profile.stacks[0], vec![0, 1, 2]);
        assert_eq!(profile.thread_name("7"), Some("MainThread"));
    }

    #[test]
    fn single_transaction_form() {
        let event: ProfileEvent = serde_json::from_value(json!({
            "version": "1",
            "transaction": {"trace_id": "t9"},
            "profile": {"samples": [], "stacks": [], "frames": [], "thread_metadata": {}}
        }))
        .unwrap();
        let ids: Vec<_> = event.profiled_transactions().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["t9"]);
    }
}
