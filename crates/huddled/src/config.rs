//! Runtime configuration for the hub.

use std::time::Duration;

/// Default bound on each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Smallest usable outbound queue. A joiner is sent its own join notice and
/// the roster back to back, so a queue of 1 overflows on registration.
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// Default maximum number of simultaneously registered connections.
pub const DEFAULT_MAX_MEMBERS: usize = 1024;

/// Default maximum frame length (1 MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1_048_576;

/// Tunables shared by the registry and every connection.
///
/// # Example
///
/// ```rust
/// use huddled::config::HubConfig;
/// use std::time::Duration;
///
/// let config = HubConfig {
///     queue_capacity: 16,
///     idle_timeout: Some(Duration::from_secs(300)),
///     ..Default::default()
/// };
/// assert!(!config.echo_chat_to_sender);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue. A member whose queue is
    /// full when a broadcast arrives is disconnected.
    pub queue_capacity: usize,

    /// Registrations beyond this many live members are refused.
    pub max_members: usize,

    /// Whether a chat line is also delivered back to the connection that
    /// sent it.
    pub echo_chat_to_sender: bool,

    /// Disconnect a client that sends nothing for this long. Disabled when `None`.
    pub idle_timeout: Option<Duration>,

    /// Longest accepted inbound line, in bytes.
    pub max_frame_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_members: DEFAULT_MAX_MEMBERS,
            echo_chat_to_sender: false,
            idle_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl HubConfig {
    /// Returns a copy with limits raised to their usable minimum.
    ///
    /// The queue capacity is raised to [`MIN_QUEUE_CAPACITY`]; the other
    /// limits are raised to 1. `tokio::sync::mpsc::channel` panics on a zero
    /// capacity, so every consumer goes through this before building queues.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(MIN_QUEUE_CAPACITY);
        self.max_members = self.max_members.max(1);
        self.max_frame_len = self.max_frame_len.max(1);
        self
    }
}
