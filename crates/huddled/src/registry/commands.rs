//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `HubEvent`: Events published by the registry for observers
//!
//! All commands travel through one channel, which is what gives every
//! client the same total order of joins, leaves and messages.

use huddle_protocol::{Envelope, EnvelopeKind};
use thiserror::Error;
use tokio::sync::oneshot;

use super::member::{ConnectionId, Member};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Queries carry a oneshot channel for the response. `Unregister` and
/// `Broadcast` are fire-and-forget: their effects are observable only
/// through the members' outbound queues and the event channel.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a connection to the live set and announce it.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyRegistered` if the id is already live
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        /// The connection to add
        member: Member,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a connection and announce its departure.
    ///
    /// Unknown ids are ignored, so this is safe to send more than once.
    Unregister {
        /// ID of the connection to remove
        id: ConnectionId,
    },

    /// Deliver an envelope to every member except `exclude`.
    Broadcast {
        /// The envelope to fan out
        envelope: Envelope,
        /// Member that must not receive it (usually the sender)
        exclude: Option<ConnectionId>,
    },

    /// Snapshot the display names of all members, in join order.
    Roster {
        /// Channel to send the result
        respond_to: oneshot::Sender<Vec<String>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A connection with this id is already registered.
    ///
    /// Ids are allocated by a single counter, so this indicates a bug in
    /// the caller rather than a client-triggered condition.
    #[error("connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    /// The registry has reached its maximum member capacity.
    #[error("registry is full (max: {max} members)")]
    RegistryFull {
        /// Maximum number of members allowed
        max: usize,
    },

    /// The actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Hub Events
// ============================================================================

/// Events published by the registry to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A connection was registered.
    MemberJoined {
        id: ConnectionId,
        name: String,
    },

    /// A connection was removed from the live set.
    MemberLeft {
        id: ConnectionId,
        name: String,
        reason: RemovalReason,
    },

    /// An envelope was fanned out.
    Broadcast {
        kind: EnvelopeKind,
        /// Number of members whose queue accepted it
        recipients: usize,
    },
}

/// Reason why a member was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection's reader ended (peer closed or transport failed).
    Disconnected,

    /// The member's outbound queue was full when a broadcast arrived.
    SlowConsumer,

    /// The member's writer had already exited and dropped its queue.
    WriterClosed,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::SlowConsumer => write!(f, "outbound queue full"),
            Self::WriterClosed => write!(f, "writer closed"),
        }
    }
}
