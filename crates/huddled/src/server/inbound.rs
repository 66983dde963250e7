//! Validation of frames received from a client.
//!
//! A client may only ever contribute chat lines under the name it was bound
//! to at handshake. Everything else is rejected here and dropped by the
//! reader pump without affecting the connection.

use thiserror::Error;

use huddle_protocol::{codec, CodecError, Envelope, EnvelopeKind};

/// Why an inbound frame was not forwarded. All variants are recoverable.
#[derive(Debug, Clone, Error)]
pub enum InboundError {
    /// The frame is not a valid envelope.
    #[error(transparent)]
    Decode(#[from] CodecError),

    /// The envelope claims to come from someone else.
    #[error("username mismatch: connection is {expected:?}, envelope claims {claimed:?}")]
    IdentityMismatch {
        expected: String,
        claimed: Option<String>,
    },

    /// Only chat envelopes are accepted from clients.
    #[error("clients may only send chat messages, got {0}")]
    NotChat(EnvelopeKind),
}

/// Decodes and validates one inbound frame for a connection bound to
/// `bound_name`. A zero timestamp is replaced with `now`.
///
/// Checks run in a fixed order: decode, identity, then kind.
pub fn accept_frame(frame: &str, bound_name: &str, now: i64) -> Result<Envelope, InboundError> {
    let envelope = codec::decode(frame)?;

    if envelope.sender() != Some(bound_name) {
        return Err(InboundError::IdentityMismatch {
            expected: bound_name.to_string(),
            claimed: envelope.sender().map(str::to_string),
        });
    }

    if envelope.kind() != EnvelopeKind::Chat {
        return Err(InboundError::NotChat(envelope.kind()));
    }

    Ok(envelope.stamped(now))
}
