//! Registry actor - owns the live connection set and processes commands.
//!
//! The RegistryActor is the single owner of membership state in the hub.
//! It receives commands via an mpsc channel and delivers envelopes into each
//! member's bounded outbound queue.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic
//! - A failing member is removed; the loop itself never stops on its account

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use huddle_protocol::Envelope;

use super::commands::{HubEvent, RegistryCommand, RegistryError, RemovalReason};
use super::member::{ConnectionId, Member, Outbound, Undeliverable};
use crate::presence;

// ============================================================================
// Fan-out Work Items
// ============================================================================

/// One pending delivery. Rosters are rendered when they are popped, so they
/// always reflect membership at delivery time.
enum Fanout {
    Notice {
        envelope: Outbound,
        exclude: Option<ConnectionId>,
    },
    Roster,
}

impl Fanout {
    fn notice(envelope: Envelope) -> Self {
        Self::Notice {
            envelope: Arc::new(envelope),
            exclude: None,
        }
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all membership state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and pushes envelopes to members.
///
/// # Ownership
///
/// `members` is keyed by `ConnectionId`. Ids are allocated in accept order,
/// so iterating the map yields members in join order; rosters inherit it.
///
/// # Delivery
///
/// Every delivery is a `try_send`. The actor never awaits a member, so one
/// stalled client cannot delay the others. A member that cannot take a
/// delivery is removed and announced like any other departure.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live members in join order
    members: BTreeMap<ConnectionId, Member>,

    /// Registration limit
    max_members: usize,

    /// Event publisher for observers
    event_publisher: broadcast::Sender<HubEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_members` - Registrations beyond this are refused
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<HubEvent>,
        max_members: usize,
    ) -> Self {
        Self {
            receiver,
            members: BTreeMap::new(),
            max_members,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// Remaining members are dropped on exit, which closes their queues.
    pub async fn run(mut self) {
        info!(max_members = self.max_members, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(members = self.members.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { member, respond_to } => {
                let result = self.handle_register(member);
                // Ignore send error - caller may have given up waiting
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister { id } => {
                self.handle_unregister(id);
            }
            RegistryCommand::Broadcast { envelope, exclude } => {
                self.fan_out([Fanout::Notice {
                    envelope: Arc::new(envelope),
                    exclude,
                }]);
            }
            RegistryCommand::Roster { respond_to } => {
                let _ = respond_to.send(self.handle_roster());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Adds a member, then announces it to everyone including itself.
    fn handle_register(&mut self, member: Member) -> Result<(), RegistryError> {
        let id = member.id();

        if self.members.contains_key(&id) {
            warn!(conn_id = %id, "Duplicate registration rejected");
            return Err(RegistryError::AlreadyRegistered(id));
        }

        if self.members.len() >= self.max_members {
            warn!(
                conn_id = %id,
                username = %member.name(),
                max = self.max_members,
                "Registry full, rejecting connection"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_members,
            });
        }

        let name = member.name().to_string();
        self.members.insert(id, member);

        info!(
            conn_id = %id,
            username = %name,
            members = self.members.len(),
            "Member registered"
        );

        let _ = self.event_publisher.send(HubEvent::MemberJoined {
            id,
            name: name.clone(),
        });

        self.fan_out([Fanout::notice(presence::join_notice(&name)), Fanout::Roster]);
        Ok(())
    }

    /// Removes a member if present. Absent ids are a no-op.
    fn handle_unregister(&mut self, id: ConnectionId) {
        match self.members.remove(&id) {
            Some(member) => {
                let notices = self.retire(member, RemovalReason::Disconnected);
                self.fan_out(notices);
            }
            None => {
                debug!(conn_id = %id, "Unregister for absent member ignored");
            }
        }
    }

    /// Handles the roster snapshot query.
    fn handle_roster(&self) -> Vec<String> {
        self.members.values().map(|m| m.name().to_string()).collect()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Delivers a batch of work items in order.
    ///
    /// Members dropped during a delivery are announced by appending their
    /// leave notice and a fresh roster to the same queue, so cascades are
    /// handled iteratively and in a single order.
    fn fan_out(&mut self, items: impl IntoIterator<Item = Fanout>) {
        let mut pending: VecDeque<Fanout> = items.into_iter().collect();

        while let Some(item) = pending.pop_front() {
            let (envelope, exclude) = match item {
                Fanout::Notice { envelope, exclude } => (envelope, exclude),
                Fanout::Roster => (
                    Arc::new(presence::roster(self.members.values().map(Member::name))),
                    None,
                ),
            };

            for (id, reason) in self.deliver(&envelope, exclude) {
                if let Some(member) = self.members.remove(&id) {
                    pending.extend(self.retire(member, reason));
                }
            }
        }
    }

    /// Offers one envelope to every member except `exclude`.
    ///
    /// Returns the members that could not take it.
    fn deliver(
        &self,
        envelope: &Outbound,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, RemovalReason)> {
        let mut recipients = 0usize;
        let mut failed = Vec::new();

        for (id, member) in &self.members {
            if exclude == Some(*id) {
                continue;
            }

            match member.offer(Arc::clone(envelope)) {
                Ok(()) => recipients += 1,
                Err(Undeliverable::QueueFull) => {
                    warn!(
                        conn_id = %id,
                        username = %member.name(),
                        "Outbound queue full, dropping slow consumer"
                    );
                    failed.push((*id, RemovalReason::SlowConsumer));
                }
                Err(Undeliverable::QueueClosed) => {
                    debug!(
                        conn_id = %id,
                        username = %member.name(),
                        "Outbound queue closed, dropping member"
                    );
                    failed.push((*id, RemovalReason::WriterClosed));
                }
            }
        }

        debug!(
            kind = %envelope.kind(),
            recipients,
            failed = failed.len(),
            "Envelope fanned out"
        );

        let _ = self.event_publisher.send(HubEvent::Broadcast {
            kind: envelope.kind(),
            recipients,
        });

        failed
    }

    /// Finishes a removed member and returns the notices announcing it.
    ///
    /// Dropping the member closes its outbound queue. Members removed for
    /// delivery failures are also hung up so their pumps release the transport
    /// even if the writer is blocked on I/O.
    fn retire(&self, member: Member, reason: RemovalReason) -> [Fanout; 2] {
        let id = member.id();
        let name = member.name().to_string();

        if reason != RemovalReason::Disconnected {
            member.hang_up();
        }
        drop(member);

        info!(
            conn_id = %id,
            username = %name,
            reason = %reason,
            members = self.members.len(),
            "Member removed"
        );

        let _ = self.event_publisher.send(HubEvent::MemberLeft {
            id,
            name: name.clone(),
            reason,
        });

        [Fanout::notice(presence::leave_notice(&name)), Fanout::Roster]
    }

    /// Returns the current number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::EnvelopeKind;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn create_actor() -> (
        mpsc::Sender<RegistryCommand>,
        RegistryActor,
        broadcast::Receiver<HubEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        let (event_tx, event_rx) = broadcast::channel(64);
        let actor = RegistryActor::new(cmd_rx, event_tx, 8);
        (cmd_tx, actor, event_rx)
    }

    fn create_member(
        id: u64,
        name: &str,
        capacity: usize,
    ) -> (Member, mpsc::Receiver<Outbound>, CancellationToken) {
        let token = CancellationToken::new();
        let (member, rx) = Member::with_queue(ConnectionId::new(id), name, capacity, token.clone());
        (member, rx, token)
    }

    fn register(actor: &mut RegistryActor, member: Member) -> oneshot::Receiver<Result<(), RegistryError>> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            member,
            respond_to: tx,
        });
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            out.push((*env).clone());
        }
        out
    }

    #[tokio::test]
    async fn test_register_announces_to_joiner() {
        let (_, mut actor, mut event_rx) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 8);

        let result = register(&mut actor, alice).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(actor.member_count(), 1);

        let received = drain(&mut alice_rx);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].text(), Some("alice joined the chat"));
        assert_eq!(received[1], Envelope::roster(vec!["alice".to_string()]));

        let event = event_rx.try_recv().unwrap();
        assert_eq!(
            event,
            HubEvent::MemberJoined {
                id: ConnectionId::new(1),
                name: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let (_, mut actor, _) = create_actor();
        let (first, _rx1, _) = create_member(1, "alice", 8);
        let (second, _rx2, _) = create_member(1, "alice-again", 8);

        register(&mut actor, first).await.unwrap().unwrap();
        let result = register(&mut actor, second).await.unwrap();

        assert_eq!(
            result,
            Err(RegistryError::AlreadyRegistered(ConnectionId::new(1)))
        );
        assert_eq!(actor.member_count(), 1);
        assert_eq!(actor.handle_roster(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_max_members_limit() {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(64);
        let mut actor = RegistryActor::new(cmd_rx, event_tx, 1);
        drop(cmd_tx);

        let (alice, _rx1, _) = create_member(1, "alice", 8);
        let (bob, _rx2, _) = create_member(2, "bob", 8);

        register(&mut actor, alice).await.unwrap().unwrap();
        let result = register(&mut actor, bob).await.unwrap();

        assert_eq!(result, Err(RegistryError::RegistryFull { max: 1 }));
        assert_eq!(actor.member_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_notifies_rest() {
        let (_, mut actor, _) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 8);
        let (bob, mut bob_rx, bob_token) = create_member(2, "bob", 8);

        register(&mut actor, alice).await.unwrap().unwrap();
        register(&mut actor, bob).await.unwrap().unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        actor.handle_command(RegistryCommand::Unregister {
            id: ConnectionId::new(2),
        });

        assert_eq!(actor.member_count(), 1);
        // Queue closed without a forced hangup
        assert!(bob_rx.recv().await.is_none());
        assert!(!bob_token.is_cancelled());

        let received = drain(&mut alice_rx);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].text(), Some("bob left the chat"));
        assert_eq!(received[1], Envelope::roster(vec!["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let (_, mut actor, mut event_rx) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 8);

        register(&mut actor, alice).await.unwrap().unwrap();
        drain(&mut alice_rx);
        while event_rx.try_recv().is_ok() {}

        actor.handle_command(RegistryCommand::Unregister {
            id: ConnectionId::new(42),
        });
        actor.handle_command(RegistryCommand::Unregister {
            id: ConnectionId::new(42),
        });

        assert_eq!(actor.member_count(), 1);
        assert!(drain(&mut alice_rx).is_empty());
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_origin() {
        let (_, mut actor, _) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 8);
        let (bob, mut bob_rx, _) = create_member(2, "bob", 8);
        let (carol, mut carol_rx, _) = create_member(3, "carol", 8);

        for member in [alice, bob, carol] {
            register(&mut actor, member).await.unwrap().unwrap();
        }
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let chat = Envelope::chat("alice", "hi", 1_000);
        actor.handle_command(RegistryCommand::Broadcast {
            envelope: chat.clone(),
            exclude: Some(ConnectionId::new(1)),
        });

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![chat.clone()]);
        assert_eq!(drain(&mut carol_rx), vec![chat]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_member_and_hangs_up() {
        let (_, mut actor, mut event_rx) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 16);
        // Capacity 2: the join notice and first roster fill it
        let (slow, mut slow_rx, slow_token) = create_member(2, "slow", 2);

        register(&mut actor, alice).await.unwrap().unwrap();
        drain(&mut alice_rx);
        register(&mut actor, slow).await.unwrap().unwrap();
        // slow's own join notice + roster are sitting in its queue
        drain(&mut alice_rx);
        while event_rx.try_recv().is_ok() {}

        actor.handle_command(RegistryCommand::Broadcast {
            envelope: Envelope::chat("alice", "anyone there?", 5),
            exclude: Some(ConnectionId::new(1)),
        });

        assert_eq!(actor.member_count(), 1);
        assert!(slow_token.is_cancelled());
        assert_eq!(
            actor.handle_roster(),
            vec!["alice".to_string()],
            "slow consumer must be gone"
        );

        // The slow member still gets what was already queued, then end of stream
        assert_eq!(drain(&mut slow_rx).len(), 2);
        assert!(slow_rx.recv().await.is_none());

        let received = drain(&mut alice_rx);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].text(), Some("slow left the chat"));
        assert_eq!(received[1], Envelope::roster(vec!["alice".to_string()]));

        let mut saw_left = false;
        while let Ok(event) = event_rx.try_recv() {
            if let HubEvent::MemberLeft { reason, .. } = event {
                assert_eq!(reason, RemovalReason::SlowConsumer);
                saw_left = true;
            }
        }
        assert!(saw_left);
    }

    #[tokio::test]
    async fn test_closed_queue_is_removed_on_next_delivery() {
        let (_, mut actor, _) = create_actor();
        let (alice, mut alice_rx, _) = create_member(1, "alice", 8);
        let (bob, bob_rx, bob_token) = create_member(2, "bob", 8);

        register(&mut actor, alice).await.unwrap().unwrap();
        register(&mut actor, bob).await.unwrap().unwrap();
        drain(&mut alice_rx);
        drop(bob_rx);

        actor.handle_command(RegistryCommand::Broadcast {
            envelope: Envelope::chat("alice", "hello?", 5),
            exclude: Some(ConnectionId::new(1)),
        });

        assert_eq!(actor.member_count(), 1);
        assert!(bob_token.is_cancelled());
        let texts: Vec<_> = drain(&mut alice_rx)
            .iter()
            .filter(|e| e.kind() == EnvelopeKind::System)
            .filter_map(|e| e.text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["bob left the chat".to_string()]);
    }

    #[tokio::test]
    async fn test_roster_is_join_order() {
        let (_, mut actor, _) = create_actor();
        let mut queues = Vec::new();
        for (id, name) in [(1, "zed"), (2, "amy"), (3, "mo")] {
            let (member, rx, _) = create_member(id, name, 8);
            queues.push(rx);
            register(&mut actor, member).await.unwrap().unwrap();
        }

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Roster { respond_to: tx });
        assert_eq!(
            rx.await.unwrap(),
            vec!["zed".to_string(), "amy".to_string(), "mo".to_string()]
        );

        // The last roster each member saw matches the snapshot
        let last = drain(&mut queues[0]).pop().unwrap();
        assert_eq!(
            last,
            Envelope::roster(vec!["zed".to_string(), "amy".to_string(), "mo".to_string()])
        );
    }

    #[tokio::test]
    async fn test_broadcast_event_counts_recipients() {
        let (_, mut actor, mut event_rx) = create_actor();
        let (alice, _alice_rx, _) = create_member(1, "alice", 8);
        let (bob, _bob_rx, _) = create_member(2, "bob", 8);

        register(&mut actor, alice).await.unwrap().unwrap();
        register(&mut actor, bob).await.unwrap().unwrap();
        while event_rx.try_recv().is_ok() {}

        actor.handle_command(RegistryCommand::Broadcast {
            envelope: Envelope::chat("bob", "yo", 9),
            exclude: Some(ConnectionId::new(2)),
        });

        assert_eq!(
            event_rx.try_recv().unwrap(),
            HubEvent::Broadcast {
                kind: EnvelopeKind::Chat,
                recipients: 1
            }
        );
    }
}
