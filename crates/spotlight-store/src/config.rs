use serde::{Deserialize, Serialize};

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Buffered notifications per subscription kind before slow subscribers
    /// start skipping.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Source-context enrichment for error frames. Disabled when `None`.
    #[serde(default)]
    pub context_lines: Option<ContextLinesConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLinesConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            context_lines: None,
        }
    }
}

impl ContextLinesConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: default_timeout_ms(),
        }
    }
}
