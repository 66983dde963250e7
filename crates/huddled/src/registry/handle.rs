//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to hub events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use huddle_protocol::Envelope;

use super::commands::{HubEvent, RegistryCommand, RegistryError};
use super::member::{ConnectionId, Member};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods communicate with the actor via its single command channel,
/// so calls from different tasks are serialized in arrival order.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.register(member).await?;
/// handle.broadcast(envelope, Some(member_id)).await?;
///
/// let names = handle.roster().await;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<HubEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<HubEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a connection and wait until its join has been announced.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRegistered` if the id is already live
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, member: Member) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                member,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Ask the registry to remove a connection.
    ///
    /// Safe to call for ids that are already gone.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::Unregister { id })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Fan an envelope out to every member except `exclude`.
    ///
    /// Returns once the request is queued; delivery happens on the actor.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast(
        &self,
        envelope: Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::Broadcast { envelope, exclude })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Get the display names of all members, in join order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn roster(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Roster { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns a guard that unregisters `id` when dropped.
    ///
    /// The guard fires on every exit path of the owning task, including
    /// early returns and cancellation.
    pub fn unregister_on_drop(&self, id: ConnectionId) -> UnregisterGuard {
        UnregisterGuard {
            sender: self.sender.clone(),
            id,
        }
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the registry actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

// ============================================================================
// Unregister Guard
// ============================================================================

/// Sends `Unregister` for one connection exactly once, on drop.
pub struct UnregisterGuard {
    sender: mpsc::Sender<RegistryCommand>,
    id: ConnectionId,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        let id = self.id;

        match self.sender.try_send(RegistryCommand::Unregister { id }) {
            Ok(()) => {
                debug!(conn_id = %id, "Unregister requested");
            }
            Err(TrySendError::Full(cmd)) => {
                // Command queue is momentarily full: finish the send on the runtime
                let sender = self.sender.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            let _ = sender.send(cmd).await;
                        });
                    }
                    Err(_) => {
                        warn!(conn_id = %id, "No runtime to deliver unregister");
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %id, "Registry gone, skipping unregister");
            }
        }
    }
}
