//! Encoding and decoding of envelopes to and from single-line JSON frames.
//!
//! Both directions are pure functions. A decode failure is always
//! recoverable: callers drop the frame and keep the connection.

use thiserror::Error;

use crate::envelope::Envelope;

/// Errors produced while converting between frames and envelopes.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The inbound frame is not a valid envelope (bad JSON, unknown `type`,
    /// or a required field is missing).
    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// The outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Decodes one frame into an envelope.
pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes an envelope into one frame. The result never contains a newline.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}
