//! Connection Manager (component I, §4.1): the only authoritative index of
//! live connections. Index mutations are serialized per key by `DashMap`'s
//! internal sharding; fan-out reads snapshot the participant set before
//! writing so a concurrent removal never corrupts an in-flight broadcast
//! (§5 "iteration that begins before a removal may still observe the
//! removed connection once").

use crate::frames::ServerFrame;
use crate::state_machine::ConnectionStateMachine;
use crate::types::{ConnectionId, ConversationId, UserId};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the writer task (wired in `hub.rs`) pushes onto the wire: either a
/// JSON application frame or a transport-level WebSocket ping. Heartbeat
/// pings are not `ServerFrame`s — the client answers them with a native
/// pong, never a JSON `pong` frame.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Frame(ServerFrame),
    Ping,
}

/// A single live connection's server-side state. The socket itself is owned
/// by the writer task reading `outbound`; handlers never hold the socket
/// directly (§9 "Cyclic references").
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: std::sync::RwLock<Option<UserId>>,
    pub joined_at: Instant,
    pub state: std::sync::Mutex<ConnectionStateMachine>,
    /// Set on every ping, cleared on every send; heartbeat checks it before
    /// sending the next ping (§4.8).
    pub answered: AtomicBool,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id,
            user_id: std::sync::RwLock::new(None),
            joined_at: Instant::now(),
            state: std::sync::Mutex::new(ConnectionStateMachine::new()),
            answered: AtomicBool::new(true),
            outbound,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id.read().unwrap().clone()
    }

    /// Best-effort write. A full/closed channel is not fatal to the caller;
    /// the connection is left for the heartbeat or the next write failure to
    /// catch and route to cleanup (§4.1 failure semantics).
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.outbound.try_send(OutboundMessage::Frame(frame)).is_ok()
    }

    /// Sends a transport-level ping and clears the answered flag (§4.8).
    pub fn ping(&self) -> bool {
        self.answered.store(false, Ordering::SeqCst);
        self.outbound.try_send(OutboundMessage::Ping).is_ok()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionStats {
    pub connections: usize,
    pub users: usize,
    pub conversations: usize,
}

/// Owns every live connection and the by-user / by-conversation indexes
/// over it.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    by_id: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    by_user: Arc<DashMap<UserId, DashSet<ConnectionId>>>,
    by_conversation: Arc<DashMap<ConversationId, DashSet<ConnectionId>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<Connection>) {
        self.by_id.insert(connection.id.clone(), connection);
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.by_id.get(connection_id).map(|e| e.clone())
    }

    /// Indexes a connection under its authenticated user. Must only be
    /// called after the state machine reaches `active` (§3 Connection
    /// invariant: "indexed by user only after authentication").
    pub fn index_by_user(&self, connection_id: &ConnectionId, user_id: UserId) {
        if let Some(conn) = self.by_id.get(connection_id) {
            *conn.user_id.write().unwrap() = Some(user_id.clone());
        }
        self.by_user.entry(user_id).or_default().insert(connection_id.clone());
    }

    pub fn attach_to_conversation(&self, connection_id: &ConnectionId, conversation_id: ConversationId) {
        self.by_conversation.entry(conversation_id).or_default().insert(connection_id.clone());
    }

    /// Atomically removes every index entry for a connection. Idempotent:
    /// a second call for an already-removed id is a no-op.
    pub fn remove(&self, connection_id: &ConnectionId) {
        let Some((_, connection)) = self.by_id.remove(connection_id) else {
            return;
        };

        if let Some(user_id) = connection.user_id() {
            if let Some(set) = self.by_user.get(&user_id) {
                set.remove(connection_id);
                if set.is_empty() {
                    drop(set);
                    self.by_user.remove(&user_id);
                }
            }
        }

        self.by_conversation.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    /// Best-effort send to every connection belonging to `user_id`.
    pub fn send_to_user(&self, user_id: &UserId, frame: ServerFrame) {
        let Some(members) = self.by_user.get(user_id) else { return };
        let snapshot: Vec<ConnectionId> = members.iter().map(|id| id.clone()).collect();
        drop(members);

        for connection_id in snapshot {
            if let Some(conn) = self.get(&connection_id) {
                conn.send(frame.clone());
            }
        }
    }

    /// Best-effort send to every connection in `conversation_id`, optionally
    /// excluding one user's connections (fan-out exclusion, §8 property 5).
    pub fn send_to_conversation(
        &self,
        conversation_id: &ConversationId,
        frame: ServerFrame,
        except_user_id: Option<&UserId>,
    ) {
        let Some(members) = self.by_conversation.get(conversation_id) else { return };
        let snapshot: Vec<ConnectionId> = members.iter().map(|id| id.clone()).collect();
        drop(members);

        for connection_id in snapshot {
            let Some(conn) = self.get(&connection_id) else { continue };
            if let Some(exclude) = except_user_id {
                if conn.user_id().as_ref() == Some(exclude) {
                    continue;
                }
            }
            conn.send(frame.clone());
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connections: self.by_id.len(),
            users: self.by_user.len(),
            conversations: self.by_conversation.len(),
        }
    }

    /// Conversation ids a connection's user currently belongs to, used by
    /// the cleanup orchestrator to target `typing:stop` broadcasts (step 4).
    pub fn conversations_for_connection(&self, connection_id: &ConnectionId) -> Vec<ConversationId> {
        self.by_conversation
            .iter()
            .filter(|e| e.value().contains(connection_id))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshot of every live connection id, used by the heartbeat sweep.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.by_id.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(id: &str) -> (Arc<Connection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Connection::new(ConnectionId(id.into()), tx)), rx)
    }

    #[test]
    fn remove_is_idempotent_and_clears_every_index() {
        let manager = ConnectionManager::new();
        let (conn, _rx) = make_connection("c1");
        manager.add(conn.clone());
        manager.index_by_user(&conn.id, UserId("u1".into()));
        manager.attach_to_conversation(&conn.id, ConversationId("conv1".into()));

        manager.remove(&conn.id);
        manager.remove(&conn.id); // second call must be a no-op, not a panic

        let stats = manager.stats();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.users, 0);
        assert_eq!(stats.conversations, 0);
    }

    #[tokio::test]
    async fn send_to_conversation_excludes_sender() {
        let manager = ConnectionManager::new();
        let (k1, mut k1_rx) = make_connection("k1");
        let (k2, mut k2_rx) = make_connection("k2");
        manager.add(k1.clone());
        manager.add(k2.clone());
        manager.index_by_user(&k1.id, UserId("u1".into()));
        manager.index_by_user(&k2.id, UserId("u2".into()));
        manager.attach_to_conversation(&k1.id, ConversationId("c1".into()));
        manager.attach_to_conversation(&k2.id, ConversationId("c1".into()));

        manager.send_to_conversation(
            &ConversationId("c1".into()),
            ServerFrame::TypingStart { user_id: "u1".into(), conversation_id: "c1".into() },
            Some(&UserId("u1".into())),
        );

        assert!(k1_rx.try_recv().is_err());
        assert!(k2_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_tab() {
        let manager = ConnectionManager::new();
        let (k1, mut k1_rx) = make_connection("k1");
        let (k2, mut k2_rx) = make_connection("k2");
        manager.add(k1.clone());
        manager.add(k2.clone());
        manager.index_by_user(&k1.id, UserId("u1".into()));
        manager.index_by_user(&k2.id, UserId("u1".into()));

        manager.send_to_user(&UserId("u1".into()), ServerFrame::Pong);

        assert!(k1_rx.try_recv().is_ok());
        assert!(k2_rx.try_recv().is_ok());
    }

    #[test]
    fn conversations_for_connection_reflects_attachments() {
        let manager = ConnectionManager::new();
        let (conn, _rx) = make_connection("c1");
        manager.add(conn.clone());
        manager.attach_to_conversation(&conn.id, ConversationId("a".into()));
        manager.attach_to_conversation(&conn.id, ConversationId("b".into()));

        let mut convs = manager.conversations_for_connection(&conn.id);
        convs.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(convs, vec![ConversationId("a".into()), ConversationId("b".into())]);
    }
}
