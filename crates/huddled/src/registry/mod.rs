//! Connection registry using Actor pattern.
//!
//! The registry is the single owner of the live connection set. It receives
//! commands via a tokio mpsc channel and is the only place membership is
//! mutated, so every client observes joins, leaves and messages in the same
//! order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Reader pumps   │────▶│  RegistryActor  │────▶│ Outbound queues │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   try_send            │
//!         │   (mpsc channel)      │   (bounded, per conn) │
//!         ▼                       ▼                       ▼
//!   Register/Unregister     BTreeMap<ConnectionId,   Writer pumps
//!   Broadcast               Member>                  drain to sockets
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

use crate::config::HubConfig;

mod actor;
mod commands;
mod handle;
mod member;

pub use actor::RegistryActor;
pub use commands::{HubEvent, RegistryCommand, RegistryError, RemovalReason};
pub use handle::{RegistryHandle, UnregisterGuard};
pub use member::{ConnectionId, Member, Outbound};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use huddled::config::HubConfig;
/// use huddled::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(&HubConfig::default());
///
///     let names = handle.roster().await;
///     assert!(names.is_empty());
/// }
/// ```
pub fn spawn_registry(config: &HubConfig) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), config.max_members.max(1));
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
