//! AI Integration Bridge (component O, §4.11): turns one inbound
//! `message:send` into a persisted user message, a streamed assistant
//! reply fanned out to the conversation's participants, and a persisted
//! assistant message with token/cost metadata.

use crate::connection::ConnectionManager;
use crate::context::truncate_messages;
use crate::error::{Error, Result};
use crate::frames::ServerFrame;
use crate::provider::{ChatParams, ChatResult, ChatTurn, ProviderAdapter, StreamSink};
use crate::repository::{ListDirection, Repository};
use crate::types::{ConversationId, Message, MessageId, MessageMetadata, MessageRole, UserId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

/// Tuning the bridge needs from `HubConfig` (§4.11 step 2, context.rs).
pub struct BridgeConfig {
    pub history_window: usize,
    pub min_content_len: usize,
    pub max_content_len: usize,
}

pub struct AiIntegrationBridge {
    repository: Arc<dyn Repository>,
    connections: ConnectionManager,
    provider: Arc<dyn ProviderAdapter>,
    config: BridgeConfig,
}

/// Validated, parsed `message:send` payload (§4.11 step 1).
pub struct MessageSendRequest {
    pub message_id: String,
    pub conversation_id: String,
    pub content: String,
    pub model_override: Option<String>,
}

/// Feeds `delta` events into `message:stream` broadcasts as they arrive,
/// per §4.11 step 5. One instance per call to `stream`; `complete`/`error`
/// are handled by the caller once `stream` returns, since both need the
/// final `ChatResult`/`Error` value it produces.
///
/// The delta frames don't name an assistant message id until the stream
/// completes (the repository assigns it on insert), so every frame in one
/// reply uses the client's own `message:send` id as a stable correlation
/// handle — matching the "distinguished by the message id in each frame"
/// ordering guarantee of §4.11.
struct BridgeSink<'a> {
    connections: &'a ConnectionManager,
    conversation_id: ConversationId,
    correlation_id: String,
    cumulative: String,
}

#[async_trait::async_trait]
impl<'a> StreamSink for BridgeSink<'a> {
    async fn on_start(&mut self, _message_id: &MessageId, _model: &str) {}

    async fn on_delta(&mut self, content: &str) {
        self.cumulative.push_str(content);
        self.connections.send_to_conversation(
            &self.conversation_id,
            ServerFrame::MessageStream {
                message_id: self.correlation_id.clone(),
                conversation_id: self.conversation_id.0.clone(),
                content: self.cumulative.clone(),
                is_complete: false,
                timestamp: Utc::now(),
            },
            None,
        );
    }

    async fn on_complete(&mut self, _result: &ChatResult) {}

    async fn on_error(&mut self, _error: &Error) {}
}

impl AiIntegrationBridge {
    pub fn new(
        repository: Arc<dyn Repository>,
        connections: ConnectionManager,
        provider: Arc<dyn ProviderAdapter>,
        config: BridgeConfig,
    ) -> Self {
        Self { repository, connections, provider, config }
    }

    /// The full `message:send` pipeline (§4.11 steps 1-7).
    pub async fn handle_message_send(&self, user_id: &UserId, request: MessageSendRequest) {
        if let Err(err) = self.validate(&request) {
            self.ack_error(user_id, &request.message_id, &err);
            return;
        }

        let conversation_id = ConversationId(request.conversation_id.clone());
        let conversation = match self.repository.get_conversation(&conversation_id).await {
            Ok(c) => c,
            Err(err) => {
                self.ack_error(user_id, &request.message_id, &err);
                return;
            }
        };

        // Open Question #1, resolved: reject when the sender does not own
        // the conversation.
        if &conversation.owner != user_id {
            let err = Error::invalid_request("sender does not own this conversation");
            self.ack_error(user_id, &request.message_id, &err);
            return;
        }

        let history = match self
            .repository
            .list_messages_for_conversation(&conversation_id, self.config.history_window, ListDirection::Forward)
            .await
        {
            Ok(h) => h,
            Err(err) => {
                self.ack_error(user_id, &request.message_id, &err);
                return;
            }
        };
        let history = truncate_messages(&history, self.config.history_window, true);

        // Step 3: persist the user message before ever calling the
        // provider, so conversation ordering survives a stream failure
        // (Open Question #2, resolved: never rolled back).
        let user_message = Message::user(conversation_id.clone(), user_id.clone(), request.content.clone());
        let user_message = match self.repository.insert_message(user_message).await {
            Ok(m) => m,
            Err(err) => {
                self.ack_error(user_id, &request.message_id, &err);
                return;
            }
        };

        self.connections.send_to_user(
            user_id,
            ServerFrame::message_ack_ok(&MessageId(request.message_id.clone())),
        );
        self.connections.send_to_conversation(
            &conversation_id,
            ServerFrame::MessageReceive {
                message_id: user_message.id.0.clone(),
                conversation_id: conversation_id.0.clone(),
                user_id: user_id.0.clone(),
                content: user_message.content.clone(),
                timestamp: user_message.created_at,
            },
            Some(user_id),
        );

        let mut turns: Vec<ChatTurn> =
            history.iter().map(|m| ChatTurn { role: m.role, content: m.content.clone() }).collect();
        turns.push(ChatTurn { role: MessageRole::User, content: request.content.clone() });

        let params = ChatParams {
            message_id: user_message.id.clone(),
            model_override: request.model_override.clone(),
            system_prompt: conversation.system_prompt.clone(),
            history: turns,
            max_output_tokens: None,
        };

        let mut sink = BridgeSink {
            connections: &self.connections,
            conversation_id: conversation_id.clone(),
            correlation_id: request.message_id.clone(),
            cumulative: String::new(),
        };

        match self.provider.stream(params, &mut sink).await {
            Ok(result) => {
                self.connections.send_to_conversation(
                    &conversation_id,
                    ServerFrame::MessageStream {
                        message_id: request.message_id.clone(),
                        conversation_id: conversation_id.0.clone(),
                        content: result.content.clone(),
                        is_complete: true,
                        timestamp: Utc::now(),
                    },
                    None,
                );

                let assistant_message = Message::assistant(conversation_id.clone(), result.content.clone());
                let metadata = MessageMetadata {
                    model: Some(result.model.clone()),
                    tokens: Some(result.token_usage),
                    cost: Some(result.cost),
                    finish_reason: Some(result.stop_reason.clone()),
                };
                let assistant_message = Message { metadata, ..assistant_message };

                if let Err(err) = self.repository.insert_message(assistant_message).await {
                    error!(error = %err, "failed to persist assistant message after successful stream");
                }
            }
            Err(err) => {
                // Step 7: no assistant message persisted; the user message
                // stays persisted from step 3.
                warn!(error = %err, conversation = %conversation_id, "stream failed");
                self.ack_error(user_id, &request.message_id, &err);
            }
        }
    }

    fn validate(&self, request: &MessageSendRequest) -> Result<()> {
        if request.conversation_id.trim().is_empty() {
            return Err(Error::invalid_request("conversationId must not be empty"));
        }
        crate::types::MessageContent::with_bounds(
            request.content.clone(),
            self.config.min_content_len,
            self.config.max_content_len,
        )
        .map_err(|_| {
            Error::invalid_request(format!(
                "content length outside allowed range [{}, {}]",
                self.config.min_content_len, self.config.max_content_len
            ))
        })?;
        Ok(())
    }

    /// §4.11 step 7 / §7 propagation policy: surface a `message:ack` with
    /// the mapped kind and a user-safe message to the originating user only.
    fn ack_error(&self, user_id: &UserId, message_id: &str, err: &Error) {
        let (kind, message) = err.to_user_facing();
        self.connections.send_to_user(
            user_id,
            ServerFrame::message_ack_err(message_id, kind, message),
        );
    }
}
