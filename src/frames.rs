//! Wire-level socket frames (§6.1): every frame is a JSON object tagged by
//! its `type` field. Client frames drive the per-connection state machine
//! and handlers; server frames are what `ConnectionManager` fans out.

use crate::error::ErrorKind;
use crate::types::{ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        credential: String,
    },
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(rename = "modelOverride")]
        model_override: Option<String>,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Ping,
}

/// Status reported on a `message:ack` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Delivered,
    Error,
}

/// Frames the hub sends to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename = "connection:established")]
    ConnectionEstablished,
    #[serde(rename = "connection:authenticated")]
    ConnectionAuthenticated { #[serde(rename = "connectionId")] connection_id: String },
    #[serde(rename = "connection:disconnected")]
    ConnectionDisconnected { code: u16, reason: String },
    #[serde(rename = "connection:error")]
    ConnectionError { kind: ErrorKind, message: String },
    #[serde(rename = "message:ack")]
    MessageAck {
        #[serde(rename = "messageId")]
        message_id: String,
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "message:receive")]
    MessageReceive {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "message:stream")]
    MessageStream {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Pong,
}

impl ServerFrame {
    pub fn message_ack_ok(message_id: &MessageId) -> Self {
        ServerFrame::MessageAck {
            message_id: message_id.0.clone(),
            status: AckStatus::Delivered,
            kind: None,
            message: None,
        }
    }

    pub fn message_ack_err(message_id: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerFrame::MessageAck {
            message_id: message_id.to_string(),
            status: AckStatus::Error,
            kind: Some(kind),
            message: Some(message.into()),
        }
    }

    pub fn typing_start(user_id: &UserId, conversation_id: &ConversationId) -> Self {
        ServerFrame::TypingStart {
            user_id: user_id.0.clone(),
            conversation_id: conversation_id.0.clone(),
        }
    }

    pub fn typing_stop(user_id: &UserId, conversation_id: &ConversationId) -> Self {
        ServerFrame::TypingStop {
            user_id: user_id.0.clone(),
            conversation_id: conversation_id.0.clone(),
        }
    }
}

/// Close codes per §6.1.
pub mod close_code {
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
    pub const RATE_LIMIT_LOCKOUT: u16 = 4000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_send_deserializes_with_camel_case_fields() {
        let json = r#"{"type":"message:send","messageId":"m1","conversationId":"c1","content":"hi","modelOverride":null}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::MessageSend { message_id, conversation_id, content, model_override } => {
                assert_eq!(message_id, "m1");
                assert_eq!(conversation_id, "c1");
                assert_eq!(content, "hi");
                assert!(model_override.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ack_error_serializes_kind_and_message() {
        let frame = ServerFrame::message_ack_err("m1", ErrorKind::RateLimit, "slow down");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message:ack");
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "rate_limit");
    }

    #[test]
    fn ping_frame_parses_with_no_fields() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }
}
