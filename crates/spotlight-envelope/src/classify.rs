//! Item classification
//!
//! Decides which kind of telemetry an envelope item carries. Items that match
//! no rule are [`EventKind::Unknown`] and are ignored by the store.

use serde_json::{Map, Value};
use spotlight_core::EventKind;

use crate::envelope::{EnvelopeItem, ItemType, Payload};

/// Profile format version the grafter understands.
pub const PROFILE_VERSION: &str = "1";

pub fn classify(item: &EnvelopeItem) -> EventKind {
    let Payload::Json(Value::Object(payload)) = &item.payload else {
        return EventKind::Unknown;
    };

    match item.ty() {
        None | Some(ItemType::Event) | Some(ItemType::Error) if has_exception(payload) => {
            EventKind::Error
        }
        Some(ItemType::Transaction) => EventKind::Transaction,
        Some(ItemType::Profile) if is_sampled_profile(payload) => EventKind::Profile,
        Some(ItemType::Log) => EventKind::Log,
        _ => EventKind::Unknown,
    }
}

fn has_exception(payload: &Map<String, Value>) -> bool {
    match payload.get("exception") {
        Some(Value::Object(exception)) => exception
            .get("values")
            .and_then(Value::as_array)
            .is_some_and(|values| !values.is_empty()),
        Some(Value::Array(values)) => !values.is_empty(),
        _ => false,
    }
}

fn is_sampled_profile(payload: &Map<String, Value>) -> bool {
    let version_ok = payload.get("version").and_then(Value::as_str) == Some(PROFILE_VERSION);
    let Some(profile) = payload.get("profile").and_then(Value::as_object) else {
        return false;
    };
    version_ok
        && ["thread_metadata", "samples", "frames", "stacks"]
            .iter()
            .all(|key| profile.contains_key(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ItemHeader;
    use serde_json::json;

    fn item(ty: Option<&str>, payload: Value) -> EnvelopeItem {
        EnvelopeItem {
            header: ItemHeader {
                ty: ty.map(|t| ItemType::from(t.to_string())),
                ..Default::default()
            },
            payload: Payload::Json(payload),
        }
    }

    fn profile_payload(version: &str) -> Value {
        json!({
            "version": version,
            "profile": {"thread_metadata": {}, "samples": [], "frames": [], "stacks": []}
        })
    }

    #[test]
    fn errors_need_exceptions() {
        let exception = json!({"exception": {"values": [{"type": "Error"}]}});
        assert_eq!(classify(&item(Some("event"), exception.clone())), EventKind::Error);
        assert_eq!(classify(&item(Some("error"), exception.clone())), EventKind::Error);
        assert_eq!(classify(&item(None, exception)), EventKind::Error);

        assert_eq!(
            classify(&item(Some("event"), json!({"exception": {"values": []}}))),
            EventKind::Unknown
        );
        assert_eq!(
            classify(&item(Some("event"), json!({"message": "hi"}))),
            EventKind::Unknown
        );
    }

    #[test]
    fn transactions_and_logs() {
        assert_eq!(classify(&item(Some("transaction"), json!({}))), EventKind::Transaction);
        assert_eq!(classify(&item(Some("log"), json!({"items": []}))), EventKind::Log);
    }

    #[test]
    fn profiles_need_version_and_parts() {
        assert_eq!(classify(&item(Some("profile"), profile_payload("1"))), EventKind::Profile);
        assert_eq!(classify(&item(Some("profile"), profile_payload("2"))), EventKind::Unknown);
        assert_eq!(
            classify(&item(Some("profile"), json!({"version": "1", "profile": {"samples": []}}))),
            EventKind::Unknown
        );
    }

    #[test]
    fn raw_and_other_items_are_unknown() {
        let raw = EnvelopeItem {
            header: ItemHeader::default(),
            payload: Payload::Raw(bytes::Bytes::from_static(b"blob")),
        };
        assert_eq!(classify(&raw), EventKind::Unknown);
        assert_eq!(classify(&item(Some("session"), json!({}))), EventKind::Unknown);
        assert_eq!(classify(&item(Some("transaction"), json!([1, 2]))), EventKind::Unknown);
    }
}
