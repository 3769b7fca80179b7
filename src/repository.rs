//! Conversation/Message Repository (component B, §6.2): the persistence
//! collaborator. The relational store itself is out of scope (§1); this
//! module defines the contract the bridge consumes and an in-memory
//! implementation used by tests and by `chat-hub-server` when no external
//! store is configured.

use crate::error::{Error, Result};
use crate::types::{Conversation, ConversationId, Message, MessageId, MessageMetadata, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Direction to read a conversation's message history in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDirection {
    /// Oldest first.
    Forward,
    /// Newest first.
    Backward,
}

/// A page of a user's conversations. Pagination/sort parameters are opaque
/// strings here — the concrete scheme belongs to the out-of-scope REST layer
/// (§1); the core only needs to round-trip a page token.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Repository operations consumed by the core (§6.2). Every operation is
/// transactional at single-record granularity; inserting a user/assistant
/// pair is not a repository concern — the bridge calls `insert` twice and
/// each call is atomic on its own.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;

    async fn list_conversations_for_user(
        &self,
        user_id: &UserId,
        page_token: Option<&str>,
    ) -> Result<Page<Conversation>>;

    async fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        direction: ListDirection,
    ) -> Result<Vec<Message>>;

    async fn insert_message(&self, message: Message) -> Result<Message>;

    async fn update_message_metadata(
        &self,
        message_id: &MessageId,
        metadata: MessageMetadata,
    ) -> Result<Message>;
}

/// In-memory implementation. Conversations must be seeded via
/// `insert_conversation` before messages reference them — there is no
/// out-of-band conversation-creation REST path in this core (§1).
#[derive(Default)]
pub struct InMemoryRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    messages: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .write()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conversations
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::invalid_request(format!("conversation '{id}' not found")))
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &UserId,
        _page_token: Option<&str>,
    ) -> Result<Page<Conversation>> {
        let items = self
            .conversations
            .read()
            .unwrap()
            .values()
            .filter(|c| &c.owner == user_id)
            .cloned()
            .collect();
        Ok(Page { items, next_page_token: None })
    }

    async fn list_messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        direction: ListDirection,
    ) -> Result<Vec<Message>> {
        let all = self
            .messages
            .read()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();

        let mut slice: Vec<Message> = match direction {
            ListDirection::Forward => all.into_iter().rev().take(limit).rev().collect(),
            ListDirection::Backward => all.into_iter().rev().take(limit).collect(),
        };
        slice.shrink_to_fit();
        Ok(slice)
    }

    async fn insert_message(&self, message: Message) -> Result<Message> {
        let mut messages = self.messages.write().unwrap();
        messages.entry(message.conversation_id.clone()).or_default().push(message.clone());
        Ok(message)
    }

    async fn update_message_metadata(
        &self,
        message_id: &MessageId,
        metadata: MessageMetadata,
    ) -> Result<Message> {
        let mut messages = self.messages.write().unwrap();
        for bucket in messages.values_mut() {
            if let Some(existing) = bucket.iter_mut().find(|m| &m.id == message_id) {
                existing.metadata = metadata;
                return Ok(existing.clone());
            }
        }
        Err(Error::invalid_request(format!("message '{message_id}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seed_conversation(repo: &InMemoryRepository, owner: &UserId) -> ConversationId {
        let id = ConversationId("c1".into());
        repo.insert_conversation(Conversation {
            id: id.clone(),
            owner: owner.clone(),
            title: "test".into(),
            model: None,
            system_prompt: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    #[tokio::test]
    async fn insert_and_list_round_trips_in_order() {
        let repo = InMemoryRepository::new();
        let owner = UserId("u1".into());
        let conv = seed_conversation(&repo, &owner);

        repo.insert_message(Message::user(conv.clone(), owner.clone(), "first")).await.unwrap();
        repo.insert_message(Message::user(conv.clone(), owner.clone(), "second")).await.unwrap();

        let history = repo
            .list_messages_for_conversation(&conv, 50, ListDirection::Forward)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[1].content, "second");
    }

    #[tokio::test]
    async fn list_respects_limit_keeping_most_recent() {
        let repo = InMemoryRepository::new();
        let owner = UserId("u1".into());
        let conv = seed_conversation(&repo, &owner);

        for i in 0..5 {
            repo.insert_message(Message::user(conv.clone(), owner.clone(), format!("m{i}"))).await.unwrap();
        }

        let history = repo
            .list_messages_for_conversation(&conv, 2, ListDirection::Forward)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "m3");
        assert_eq!(history[1].content, "m4");
    }

    #[tokio::test]
    async fn update_metadata_mutates_persisted_message() {
        let repo = InMemoryRepository::new();
        let owner = UserId("u1".into());
        let conv = seed_conversation(&repo, &owner);
        let msg = repo.insert_message(Message::assistant(conv.clone(), "hi")).await.unwrap();

        let updated = repo
            .update_message_metadata(
                &msg.id,
                MessageMetadata { model: Some("gpt-test".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(updated.metadata.model.as_deref(), Some("gpt-test"));
    }

    #[tokio::test]
    async fn get_conversation_fails_for_unknown_id() {
        let repo = InMemoryRepository::new();
        let err = repo.get_conversation(&ConversationId("missing".into())).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidRequest);
    }
}
