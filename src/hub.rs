//! Hub wiring: the axum WebSocket handler that ties the Connection Manager
//! (I), the per-connection state machine (J), the rate limiter (K), the
//! typing tracker (L), the heartbeat sweep (M), the cleanup orchestrator
//! (N), and the AI integration bridge (O) into one socket lifecycle, per
//! §4.1-§4.11 and the framing in §6.1.
//!
//! Grounded on the split-sender/receiver + writer-task pattern in
//! `other_examples`' `joshlacal-mls-ds` realtime websocket handler: a
//! dedicated writer task owns the socket's write half and drains an mpsc
//! channel, so handler code never touches the socket directly (§9 "Cyclic
//! references" — the socket handle is the only direct reference a handler
//! holds, and here even that lives only in the writer task).

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::auth::TokenVerifier;
use crate::bridge::{AiIntegrationBridge, MessageSendRequest};
use crate::cleanup::CleanupOrchestrator;
use crate::connection::{Connection, ConnectionManager, OutboundMessage};
use crate::frames::{close_code, ClientFrame, ServerFrame};
use crate::rate_limiter::RateLimiterRegistry;
use crate::state_machine::CloseCause;
use crate::typing::{TypingBroadcaster, TypingTracker};
use crate::types::{ConnectionId, ConversationId, UserId};

/// Broadcasts typing events through the shared `ConnectionManager`,
/// excluding the originator (§4.10, fan-out exclusion property).
struct HubTypingBroadcaster {
    connections: ConnectionManager,
}

impl TypingBroadcaster for HubTypingBroadcaster {
    fn broadcast_start(&self, user: &UserId, conversation: &ConversationId) {
        self.connections.send_to_conversation(conversation, ServerFrame::typing_start(user, conversation), Some(user));
    }

    fn broadcast_stop(&self, user: &UserId, conversation: &ConversationId) {
        self.connections.send_to_conversation(conversation, ServerFrame::typing_stop(user, conversation), Some(user));
    }
}

/// Every collaborator a live connection's handler loop needs. Cheap to
/// clone: every field is itself `Arc`-backed or a handle type.
#[derive(Clone)]
pub struct Hub {
    pub connections: ConnectionManager,
    pub cleanup: Arc<CleanupOrchestrator>,
    pub rate_limiter: Arc<RateLimiterRegistry>,
    pub typing: Arc<TypingTracker>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub bridge: Arc<AiIntegrationBridge>,
    pub heartbeat_interval: Duration,
}

impl Hub {
    /// `connections` is shared with whatever constructed `bridge` — both
    /// must fan out to the same live-connection index, so the caller builds
    /// one `ConnectionManager` and hands it to both collaborators.
    pub fn new(
        connections: ConnectionManager,
        verifier: Arc<dyn TokenVerifier>,
        bridge: Arc<AiIntegrationBridge>,
        rate_limit_max_messages: u32,
        rate_limit_window: Duration,
        typing_expiry: Duration,
        typing_spam_window: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiterRegistry::new(rate_limit_max_messages, rate_limit_window));
        let typing = Arc::new(TypingTracker::new(
            typing_expiry,
            typing_spam_window,
            Arc::new(HubTypingBroadcaster { connections: connections.clone() }),
        ));
        let cleanup = Arc::new(CleanupOrchestrator::new(connections.clone(), rate_limiter.clone(), typing.clone()));

        Self { connections, cleanup, rate_limiter, typing, verifier, bridge, heartbeat_interval }
    }

    /// Spawns the heartbeat sweep loop (§4.8) over this hub's connections.
    pub fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let cleanup = self.cleanup.clone();
        crate::heartbeat::spawn(
            self.connections.clone(),
            self.heartbeat_interval,
            Arc::new(move |connection_id: ConnectionId, cause: CloseCause| {
                let cleanup = cleanup.clone();
                tokio::spawn(async move {
                    cleanup.notify_disconnected(&connection_id, close_code::INTERNAL, "heartbeat timeout");
                    cleanup.cleanup(&connection_id, cause).await;
                });
            }),
        )
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/ws", get(ws_upgrade)).with_state(self)
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Drives one connection's entire lifecycle: §4.2's `connecting ->
/// authenticating -> active -> closing`, dispatching every subsequent
/// inbound frame until the socket closes or is forcibly cleaned up.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<OutboundMessage>(128);

    let connection_id = ConnectionId::new();
    let connection = Arc::new(Connection::new(connection_id.clone(), outbound_tx));
    hub.connections.add(connection.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let ws_msg = match msg {
                OutboundMessage::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => WsMessage::Text(json),
                    Err(e) => {
                        error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                },
                OutboundMessage::Ping => WsMessage::Ping(Vec::new()),
            };
            if ws_sender.send(ws_msg).await.is_err() {
                break;
            }
        }
    });

    // §4.2 `connecting -> authenticating`: the upgrade above is the socket
    // upgrade; the state machine's own transition needs no frame emission.
    {
        let mut sm = connection.state.lock().unwrap();
        sm.on_upgrade_complete();
    }

    let cause = read_loop(&connection, &mut ws_receiver, &hub).await;

    hub.cleanup.notify_disconnected(&connection.id, close_code_for(cause), cause.as_str());
    hub.cleanup.cleanup(&connection.id, cause).await;
    writer.abort();
}

fn close_code_for(cause: CloseCause) -> u16 {
    match cause {
        CloseCause::AuthFailure => close_code::POLICY_VIOLATION,
        CloseCause::ClientClose => 1000,
        CloseCause::WriteFailure | CloseCause::HeartbeatTimeout | CloseCause::Shutdown => close_code::INTERNAL,
    }
}

/// Reads inbound frames until the socket closes, a write fails, or
/// authentication fails; returns the cause to report to cleanup.
async fn read_loop(
    connection: &Arc<Connection>,
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    hub: &Arc<Hub>,
) -> CloseCause {
    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(connection = %connection.id, error = %e, "websocket read error");
                return CloseCause::WriteFailure;
            }
        };

        match msg {
            WsMessage::Text(text) => {
                if !connection.state.lock().unwrap().is_active() {
                    if let Some(cause) = authenticate(connection, &text, hub).await {
                        return cause;
                    }
                    continue;
                }
                if let Some(cause) = dispatch(connection, &text, hub).await {
                    return cause;
                }
            }
            WsMessage::Pong(_) => {
                connection.answered.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            WsMessage::Close(_) => return CloseCause::ClientClose,
            // Ping/Binary frames carry no application meaning in this
            // protocol (§6.1 frames are JSON text only); axum answers
            // native pings automatically.
            WsMessage::Ping(_) | WsMessage::Binary(_) => {}
        }
    }
    CloseCause::ClientClose
}

/// §4.2 `authenticating -> active` / `authenticating -> closing`: the first
/// inbound frame must be `auth`.
async fn authenticate(connection: &Arc<Connection>, text: &str, hub: &Arc<Hub>) -> Option<CloseCause> {
    let credential = match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Auth { credential }) => credential,
        _ => {
            fail_auth(connection, "first frame must be an auth credential");
            return Some(CloseCause::AuthFailure);
        }
    };

    match hub.verifier.verify(&credential).await {
        Ok(user_id) => {
            {
                let mut sm = connection.state.lock().unwrap();
                sm.on_authenticated();
            }
            hub.connections.index_by_user(&connection.id, user_id);
            connection.send(ServerFrame::ConnectionEstablished);
            connection.send(ServerFrame::ConnectionAuthenticated { connection_id: connection.id.0.clone() });
            None
        }
        Err(err) => {
            fail_auth(connection, &err.message);
            Some(CloseCause::AuthFailure)
        }
    }
}

fn fail_auth(connection: &Arc<Connection>, reason: &str) {
    connection.state.lock().unwrap().on_authentication_failed(crate::error::ErrorKind::Authentication, reason);
    connection.send(ServerFrame::ConnectionError {
        kind: crate::error::ErrorKind::Authentication,
        message: reason.to_string(),
    });
}

/// Dispatches one inbound frame from an already-`active` connection.
async fn dispatch(connection: &Arc<Connection>, text: &str, hub: &Arc<Hub>) -> Option<CloseCause> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(connection = %connection.id, error = %e, "ignoring unparsable client frame");
            return None;
        }
    };

    let Some(user_id) = connection.user_id() else {
        // Unreachable once `active` per the state machine invariant, kept
        // defensive since `user_id` is behind its own lock.
        return None;
    };

    match frame {
        ClientFrame::Auth { .. } => {
            // A second auth frame after authentication is a no-op; the
            // state machine only accepts it once.
        }
        ClientFrame::Ping => {
            connection.send(ServerFrame::Pong);
        }
        ClientFrame::TypingStart { conversation_id } => {
            let conversation_id = ConversationId(conversation_id);
            hub.connections.attach_to_conversation(&connection.id, conversation_id.clone());
            hub.typing.start(&user_id, &conversation_id).await;
        }
        ClientFrame::TypingStop { conversation_id } => {
            let conversation_id = ConversationId(conversation_id);
            hub.typing.stop(&user_id, &conversation_id).await;
        }
        ClientFrame::MessageSend { message_id, conversation_id, content, model_override } => {
            if !hub.rate_limiter.check(&connection.id) {
                connection.send(ServerFrame::message_ack_err(
                    &message_id,
                    crate::error::ErrorKind::RateLimit,
                    "too many messages; slow down",
                ));
                return None;
            }

            hub.connections.attach_to_conversation(&connection.id, ConversationId(conversation_id.clone()));

            let bridge = hub.bridge.clone();
            let request = MessageSendRequest { message_id, conversation_id, content, model_override };
            tokio::spawn(async move {
                bridge.handle_message_send(&user_id, request).await;
            });
        }
    }
    None
}

/// Administrative shutdown (§5): closes every live connection and awaits
/// cleanup before returning.
pub async fn shutdown(hub: &Hub) {
    let ids = hub.connections.connection_ids();
    info!(count = ids.len(), "administrative shutdown: closing all connections");
    for id in ids {
        hub.cleanup.notify_disconnected(&id, close_code::INTERNAL, "shutdown");
        hub.cleanup.cleanup(&id, CloseCause::Shutdown).await;
    }
}
