//! Core data model: identities, conversations, messages, and the wire-level
//! message role/content shapes shared between the repository, the provider
//! adapters, and the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable-across-sessions user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque conversation identity, unique within process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque message identity. Client-generated for user messages, server-
/// generated for assistant messages; durable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque connection identity, unique within process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A conversation record. Owner is set at creation and never mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner: UserId,
    pub title: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which participant authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

/// Dollar cost computed from a pricing table and reported token usage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
    pub currency: &'static str,
}

impl Cost {
    pub fn zero() -> Self {
        Self {
            input: 0.0,
            output: 0.0,
            total: 0.0,
            currency: "USD",
        }
    }
}

impl Default for Cost {
    fn default() -> Self {
        Self::zero()
    }
}

/// Metadata attached to assistant messages; absent on user/system messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub model: Option<String>,
    pub tokens: Option<TokenUsage>,
    pub cost: Option<Cost>,
    pub finish_reason: Option<String>,
}

/// Validated message content: non-empty, at most 50,000 characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

/// Maximum content length in characters, per the data model invariant.
pub const MAX_MESSAGE_CONTENT_LEN: usize = 50_000;

impl MessageContent {
    /// Validates against the fixed data-model bound (§3: non-empty, ≤
    /// `MAX_MESSAGE_CONTENT_LEN` characters).
    pub fn new(content: impl Into<String>) -> crate::error::Result<Self> {
        Self::with_bounds(content, 1, MAX_MESSAGE_CONTENT_LEN)
    }

    /// Validates against a caller-supplied `[min_len, max_len]` range in
    /// characters, for callers (like `bridge::validate`) whose bounds are
    /// configurable rather than the fixed data-model default.
    pub fn with_bounds(content: impl Into<String>, min_len: usize, max_len: usize) -> crate::error::Result<Self> {
        let content = content.into();
        let len = content.chars().count();
        if len < min_len || len > max_len {
            return Err(crate::error::Error::validation(format!(
                "message content length {len} outside allowed range [{min_len}, {max_len}]"
            )));
        }
        Ok(Self(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted chat message. Never mutated after creation except for the
/// one allowed `updateMetadata` call applied to assistant messages once
/// their stream completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: Option<UserId>,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(conversation_id: ConversationId, author: UserId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            conversation_id,
            author: Some(author),
            role: MessageRole::User,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            conversation_id,
            author: None,
            role: MessageRole::Assistant,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn system(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            conversation_id,
            author: None,
            role: MessageRole::System,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }
}
