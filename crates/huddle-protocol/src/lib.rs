//! Huddle Protocol - Wire envelope for the chat hub
//!
//! This crate defines the envelope exchanged between the hub and its
//! clients and the codec that turns envelopes into newline-delimited JSON
//! frames and back, along with the display name rules both sides share.

pub mod codec;
pub mod envelope;
pub mod names;

pub use codec::{decode, encode, CodecError};
pub use envelope::{now_millis, Envelope, EnvelopeKind, MissingField, SYSTEM_SENDER};
pub use names::{is_reserved_name, normalize_display_name, MAX_DISPLAY_NAME_CHARS};
