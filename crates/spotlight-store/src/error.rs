use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Context lines provider error: {0}")]
    ContextLines(#[from] ContextLinesError),
}

#[derive(Error, Debug)]
pub enum ContextLinesError {
    #[error("Invalid context lines URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Context lines request timed out")]
    Timeout,

    #[error("Context lines request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Context lines provider returned status {status}")]
    Status { status: u16 },
}

impl From<reqwest::Error> for ContextLinesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ContextLinesError::Timeout
        } else {
            ContextLinesError::Http(err)
        }
    }
}
