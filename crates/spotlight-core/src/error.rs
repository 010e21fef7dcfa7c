use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Log container has no item list")]
    InvalidLogContainer,

    #[error("Item kind is not stored")]
    UnsupportedKind,
}
