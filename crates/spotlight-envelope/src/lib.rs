//! # Spotlight Envelope
//!
//! Parses Sentry envelopes and classifies their items.
//!
//! ```text
//! raw bytes
//!     ↓
//! process_envelope / Envelope::from_bytes (envelope.rs)
//!     ↓
//! classify (classify.rs)
//!     ↓
//! Store::push_envelope
//! ```

pub mod classify;
pub mod envelope;
pub mod process;

pub use classify::classify;
pub use envelope::{
    Envelope, EnvelopeError, EnvelopeHeader, EnvelopeItem, ItemHeader, ItemType, Payload,
    ENVELOPE_CONTENT_TYPE,
};
pub use process::{process_envelope, ProcessedEnvelope, RawEnvelope};
