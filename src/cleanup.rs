//! Cleanup Orchestrator (component N, §4.9): the exactly-once teardown path
//! run on every disconnect cause, in the fixed six-step order the spec
//! prescribes.

use crate::connection::ConnectionManager;
use crate::frames::ServerFrame;
use crate::rate_limiter::RateLimiterRegistry;
use crate::state_machine::CloseCause;
use crate::typing::TypingTracker;
use crate::types::{ConnectionId, UserId};
use dashmap::DashSet;
use std::sync::Arc;
use tracing::info;

pub struct CleanupOrchestrator {
    connections: ConnectionManager,
    rate_limiter: Arc<RateLimiterRegistry>,
    typing: Arc<TypingTracker>,
    cleaned: DashSet<ConnectionId>,
}

impl CleanupOrchestrator {
    pub fn new(
        connections: ConnectionManager,
        rate_limiter: Arc<RateLimiterRegistry>,
        typing: Arc<TypingTracker>,
    ) -> Self {
        Self { connections, rate_limiter, typing, cleaned: DashSet::new() }
    }

    /// Runs steps 1-6 of §4.9 for `connection_id`. Idempotent: a second call
    /// for the same connection id is a no-op.
    pub async fn cleanup(&self, connection_id: &ConnectionId, cause: CloseCause) {
        if !self.cleaned.insert(connection_id.clone()) {
            return;
        }

        let user_id = self.connections.get(connection_id).and_then(|c| c.user_id());
        let joined_at = self.connections.get(connection_id).map(|c| c.joined_at);
        let conversations = self.connections.conversations_for_connection(connection_id);

        // Steps 1-2: index removal is atomic inside ConnectionManager::remove.
        self.connections.remove(connection_id);

        // Step 3: the per-connection rate-limiter window. The heartbeat
        // timer has no per-connection handle to cancel here: it is a single
        // sweep loop over the (now-absent) connection, so it self-excludes
        // on the next tick.
        self.rate_limiter.remove(connection_id);

        // Step 4: purge typing state for this connection's user and
        // broadcast `typing:stop` to affected conversations.
        if let Some(user_id) = &user_id {
            self.typing.purge_user(user_id).await;
        }

        // Step 5: closing the socket itself is the writer task's job once
        // its channel is dropped; nothing left to do here beyond indexes.

        // Step 6: one structured disconnect log entry.
        let duration = joined_at.map(|j| j.elapsed());
        info!(
            connection_id = %connection_id,
            user_id = user_id.as_ref().map(UserId::to_string).unwrap_or_default(),
            duration_ms = duration.map(|d| d.as_millis() as u64).unwrap_or(0),
            cause = cause.as_str(),
            conversations = conversations.len(),
            "connection disconnected"
        );
    }

    /// Broadcasts the terminal `connection:disconnected` frame to the
    /// connection itself, if its writer channel is still live. Separate from
    /// `cleanup` because a failed write is itself one of the causes that
    /// triggers cleanup (§4.1 failure semantics) — callers decide whether to
    /// attempt this before or skip it entirely.
    pub fn notify_disconnected(&self, connection_id: &ConnectionId, code: u16, reason: &str) {
        if let Some(conn) = self.connections.get(connection_id) {
            conn.send(ServerFrame::ConnectionDisconnected { code, reason: reason.to_string() });
        }
    }
}
