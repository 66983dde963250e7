//! Error types for the huddle line client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use huddle_protocol::CodecError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Client errors.
///
/// Most variants end only the current connection; the client reconnects
/// until [`ClientError::RetriesExhausted`] is reached.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No display name was configured.
    #[error("A non-empty username is required")]
    EmptyUsername,

    /// The display name is kept for the hub's own notices.
    #[error("The username {0:?} is reserved")]
    ReservedUsername(String),

    /// Every connection attempt in a row failed.
    #[error("Gave up connecting to {addr} after {attempts} attempts")]
    RetriesExhausted {
        /// Server address that was tried.
        addr: String,
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// The client was cancelled while connecting.
    #[error("Cancelled")]
    Cancelled,

    /// An envelope could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// A frame exceeded the maximum line length.
    #[error("Frame exceeds maximum length")]
    FrameTooLarge,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<LinesCodecError> for ClientError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::FrameTooLarge,
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
