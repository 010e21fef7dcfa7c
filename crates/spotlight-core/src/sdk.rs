use serde::{Deserialize, Serialize};

/// SDK identity as declared in envelope headers and event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdkInfo {
    #[serde(default = "unknown")]
    pub name: String,
    #[serde(default = "unknown")]
    pub version: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl SdkInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Placeholder identity for envelopes that carry no SDK hint at all.
    pub fn unknown() -> Self {
        Self::new(unknown(), unknown())
    }

    /// Identity synthesized from a bare platform string.
    pub fn from_platform(platform: &str) -> Self {
        Self::new(format!("sentry.{}", platform), unknown())
    }

    /// Platform implied by the SDK name, e.g. `sentry.javascript.node` -> `javascript`.
    pub fn platform(&self) -> Option<&str> {
        infer_platform(&self.name)
    }
}

/// Derive a platform from an SDK name.
pub fn infer_platform(sdk_name: &str) -> Option<&str> {
    let name = sdk_name.strip_prefix("sentry.").unwrap_or(sdk_name);
    let platform = name.split('.').next().unwrap_or_default();
    if platform.is_empty() || platform == "unknown" {
        None
    } else {
        Some(platform)
    }
}
