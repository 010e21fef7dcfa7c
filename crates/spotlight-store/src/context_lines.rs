//! Source-context enrichment for error stack frames.
//!
//! Providers are best-effort: callers log failures and keep the frames they
//! already have.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spotlight_core::Frame;
use std::time::Duration;

use crate::config::ContextLinesConfig;
use crate::error::ContextLinesError;

#[async_trait]
pub trait ContextLinesProvider: Send + Sync {
    /// Return `frames` with `pre_context`/`context_line`/`post_context` filled
    /// in where the provider has the source.
    async fn enrich(&self, frames: Vec<Frame>) -> Result<Vec<Frame>, ContextLinesError>;
}

#[derive(Serialize, Deserialize)]
struct StacktraceBody {
    stacktrace: FramesBody,
}

#[derive(Serialize, Deserialize)]
struct FramesBody {
    #[serde(default)]
    frames: Vec<Frame>,
}

/// Posts `{"stacktrace": {"frames": [...]}}` to a context-lines endpoint and
/// expects the same shape back.
pub struct HttpContextLines {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpContextLines {
    pub fn new(config: &ContextLinesConfig) -> Result<Self, ContextLinesError> {
        let url = reqwest::Url::parse(&config.url).map_err(|e| ContextLinesError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("spotlight/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl ContextLinesProvider for HttpContextLines {
    async fn enrich(&self, frames: Vec<Frame>) -> Result<Vec<Frame>, ContextLinesError> {
        let body = StacktraceBody {
            stacktrace: FramesBody { frames },
        };
        let response = self.client.post(self.url.clone()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContextLinesError::Status {
                status: status.as_u16(),
            });
        }

        let body: StacktraceBody = response.json().await?;
        Ok(body.stacktrace.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        let err = HttpContextLines::new(&ContextLinesConfig::new("not a url"))
            .err()
            .expect("invalid url must be rejected");
        assert!(matches!(err, ContextLinesError::InvalidUrl { .. }));
    }

    #[test]
    fn request_body_shape() {
        let body = StacktraceBody {
            stacktrace: FramesBody {
                frames: vec![Frame {
                    filename: Some("app.js".to_string()),
                    lineno: Some(3),
                    ..Default::default()
                }],
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stacktrace"]["frames"][0]["filename"], "app.js");
        assert_eq!(value["stacktrace"]["frames"][0]["lineno"], 3);
    }
}
