//! The registry's view of one live connection.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use huddle_protocol::Envelope;

/// Item carried by an outbound queue. Shared so one broadcast is allocated once.
pub type Outbound = Arc<Envelope>;

/// Stable identity of a connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A registered connection as seen by the registry actor.
///
/// The registry holds the only [`mpsc::Sender`] for the connection's
/// outbound queue, so dropping the `Member` closes the queue and lets the
/// writer pump finish. The `hangup` token is the forced-close signal
/// observed by both pumps.
#[derive(Debug)]
pub struct Member {
    id: ConnectionId,
    name: String,
    outbound: mpsc::Sender<Outbound>,
    hangup: CancellationToken,
}

/// Why a non-blocking delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Undeliverable {
    /// The queue is at capacity: the consumer is not keeping up.
    QueueFull,
    /// The receiving side is gone: the writer pump has already exited.
    QueueClosed,
}

impl Member {
    pub fn new(
        id: ConnectionId,
        name: impl Into<String>,
        outbound: mpsc::Sender<Outbound>,
        hangup: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            outbound,
            hangup,
        }
    }

    /// Creates a member together with the receiving end of its outbound
    /// queue (bounded at `capacity`, minimum 1).
    pub fn with_queue(
        id: ConnectionId,
        name: impl Into<String>,
        capacity: usize,
        hangup: CancellationToken,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, name, tx, hangup), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempts to enqueue without waiting.
    pub(crate) fn offer(&self, envelope: Outbound) -> Result<(), Undeliverable> {
        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => Undeliverable::QueueFull,
            TrySendError::Closed(_) => Undeliverable::QueueClosed,
        })
    }

    /// Signals both pumps to stop and release the transport.
    pub(crate) fn hang_up(&self) {
        self.hangup.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).get(), 7);
    }

    #[tokio::test]
    async fn test_offer_reports_full_then_closed() {
        let (member, mut rx) =
            Member::with_queue(ConnectionId::new(1), "alice", 1, CancellationToken::new());

        assert_eq!(member.offer(Arc::new(Envelope::system("one"))), Ok(()));
        assert_eq!(
            member.offer(Arc::new(Envelope::system("two"))),
            Err(Undeliverable::QueueFull)
        );

        assert_eq!(rx.recv().await.unwrap().text(), Some("one"));
        drop(rx);
        assert_eq!(
            member.offer(Arc::new(Envelope::system("three"))),
            Err(Undeliverable::QueueClosed)
        );
    }

    #[test]
    fn test_hang_up_cancels_token() {
        let token = CancellationToken::new();
        let (member, _rx) = Member::with_queue(ConnectionId::new(2), "bob", 4, token.clone());

        assert!(!token.is_cancelled());
        member.hang_up();
        assert!(token.is_cancelled());
    }
}
