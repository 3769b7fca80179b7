//! Heartbeat / Liveness Probe (component M, §4.8): a periodic sweep over
//! every live connection. A connection that misses two consecutive
//! intervals is terminated within ~2·interval.

use crate::connection::ConnectionManager;
use crate::state_machine::CloseCause;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the caller should do with a connection the sweep found unanswered.
/// The heartbeat module has no cleanup dependency of its own (kept free of
/// a cycle with `cleanup`); the hub wiring acts on this.
pub enum SweepAction {
    Ping,
    Terminate,
}

/// Runs one sweep pass: pings every connection whose previous ping was
/// answered, and reports connections that missed their previous ping so the
/// caller can route them to the Cleanup Orchestrator with cause
/// `heartbeat-timeout`.
pub fn sweep(manager: &ConnectionManager) -> Vec<(crate::types::ConnectionId, SweepAction)> {
    let mut actions = Vec::new();
    for connection_id in manager.connection_ids() {
        let Some(conn) = manager.get(&connection_id) else { continue };

        if conn.answered.load(Ordering::SeqCst) {
            conn.ping();
            actions.push((connection_id, SweepAction::Ping));
        } else {
            actions.push((connection_id, SweepAction::Terminate));
        }
    }
    actions
}

/// Spawns the periodic sweep loop. Returns a handle the caller can abort on
/// administrative shutdown.
pub fn spawn(
    manager: ConnectionManager,
    interval: Duration,
    on_timeout: Arc<dyn Fn(crate::types::ConnectionId, CloseCause) + Send + Sync>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            for (connection_id, action) in sweep(&manager) {
                match action {
                    SweepAction::Ping => {
                        debug!(connection = %connection_id, "heartbeat ping sent");
                    }
                    SweepAction::Terminate => {
                        on_timeout(connection_id, CloseCause::HeartbeatTimeout);
                    }
                }
            }
        }
    })
}
