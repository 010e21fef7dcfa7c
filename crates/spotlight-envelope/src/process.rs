use bytes::Bytes;

use crate::envelope::{Envelope, EnvelopeError, ENVELOPE_CONTENT_TYPE};

/// The bytes an envelope was parsed from, kept for the envelope log.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub content_type: String,
    pub data: Bytes,
}

/// A parsed envelope together with its raw context.
#[derive(Debug, Clone)]
pub struct ProcessedEnvelope {
    pub envelope: Envelope,
    pub raw: Option<RawEnvelope>,
}

impl From<Envelope> for ProcessedEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            envelope,
            raw: None,
        }
    }
}

/// Parse raw envelope bytes as delivered by a transport.
///
/// A malformed envelope header fails this envelope only; callers drop it and
/// carry on with the next one.
pub fn process_envelope(
    content_type: Option<&str>,
    data: Bytes,
) -> Result<ProcessedEnvelope, EnvelopeError> {
    let envelope = Envelope::from_bytes(data.clone())?;
    Ok(ProcessedEnvelope {
        envelope,
        raw: Some(RawEnvelope {
            content_type: content_type.unwrap_or(ENVELOPE_CONTENT_TYPE).to_string(),
            data,
        }),
    })
}
