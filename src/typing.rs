//! Typing Tracker (component L, §4.10): per-(user, conversation) short-lived
//! state with auto-expiry, sharded by key so unrelated conversations never
//! contend on the same lock (§5 "Typing tracker: exclusive writer per key").

use crate::types::{ConversationId, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    user: UserId,
    conversation: ConversationId,
}

struct Entry {
    /// Generation counter: an expiry task compares this before acting, so a
    /// refresh (or explicit stop) started after the task was scheduled
    /// invalidates its firing instead of racing it.
    generation: u64,
    last_started: Instant,
}

/// Broadcasts a `typing:start`/`typing:stop` to a conversation's other
/// participants. Implemented by the hub wiring so this module stays free of
/// a `ConnectionManager` dependency.
pub trait TypingBroadcaster: Send + Sync {
    fn broadcast_start(&self, user: &UserId, conversation: &ConversationId);
    fn broadcast_stop(&self, user: &UserId, conversation: &ConversationId);
}

pub struct TypingTracker {
    entries: Arc<DashMap<Key, AsyncMutex<Entry>>>,
    expiry: Duration,
    spam_window: Duration,
    broadcaster: Arc<dyn TypingBroadcaster>,
}

impl TypingTracker {
    pub fn new(expiry: Duration, spam_window: Duration, broadcaster: Arc<dyn TypingBroadcaster>) -> Self {
        Self { entries: Arc::new(DashMap::new()), expiry, spam_window, broadcaster }
    }

    /// `typing:start`: ignored if refreshed within the spam window; otherwise
    /// refreshes the 5-second expiry and broadcasts, and schedules the
    /// expiry task.
    pub async fn start(&self, user: &UserId, conversation: &ConversationId) {
        let key = Key { user: user.clone(), conversation: conversation.clone() };
        let now = Instant::now();

        let should_broadcast = {
            let entry_lock = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| AsyncMutex::new(Entry { generation: 0, last_started: now - self.spam_window }));
            let mut entry = entry_lock.lock().await;

            if now.duration_since(entry.last_started) < self.spam_window {
                false
            } else {
                entry.generation += 1;
                entry.last_started = now;
                true
            }
        };

        if !should_broadcast {
            return;
        }

        self.broadcaster.broadcast_start(user, conversation);
        self.schedule_expiry(key, user.clone(), conversation.clone());
    }

    /// `typing:stop`: removes the entry and broadcasts unconditionally.
    pub async fn stop(&self, user: &UserId, conversation: &ConversationId) {
        let key = Key { user: user.clone(), conversation: conversation.clone() };
        if let Some((_, lock)) = self.entries.remove(&key) {
            let mut entry = lock.lock().await;
            entry.generation += 1; // invalidate any pending expiry task
        }
        self.broadcaster.broadcast_stop(user, conversation);
    }

    /// Purges every entry for `user` across all conversations (cleanup step
    /// 4, §4.9), broadcasting `typing:stop` for each.
    pub async fn purge_user(&self, user: &UserId) {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|e| e.key().user == *user)
            .map(|e| e.key().clone())
            .collect();

        for key in keys {
            let conversation = key.conversation.clone();
            if let Some((_, lock)) = self.entries.remove(&key) {
                let mut entry = lock.lock().await;
                entry.generation += 1;
            }
            self.broadcaster.broadcast_stop(user, &conversation);
        }
    }

    fn schedule_expiry(&self, key: Key, user: UserId, conversation: ConversationId) {
        let entries = self.entries.clone();
        let broadcaster = self.broadcaster.clone();
        let expiry = self.expiry;

        tokio::spawn(async move {
            let generation_at_schedule = {
                match entries.get(&key) {
                    Some(lock) => lock.lock().await.generation,
                    None => return,
                }
            };

            tokio::time::sleep(expiry).await;

            let Some(lock) = entries.get(&key) else { return };
            let mut entry = lock.lock().await;
            if entry.generation != generation_at_schedule {
                // Refreshed or stopped since we were scheduled; not our job.
                return;
            }
            drop(entry);
            entries.remove(&key);
            broadcaster.broadcast_stop(&user, &conversation);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroadcaster {
        starts: Mutex<Vec<(UserId, ConversationId)>>,
        stops: Mutex<Vec<(UserId, ConversationId)>>,
    }

    impl TypingBroadcaster for RecordingBroadcaster {
        fn broadcast_start(&self, user: &UserId, conversation: &ConversationId) {
            self.starts.lock().unwrap().push((user.clone(), conversation.clone()));
        }
        fn broadcast_stop(&self, user: &UserId, conversation: &ConversationId) {
            self.stops.lock().unwrap().push((user.clone(), conversation.clone()));
        }
    }

    fn tracker(expiry: Duration, spam_window: Duration) -> (Arc<RecordingBroadcaster>, TypingTracker) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let tracker = TypingTracker::new(expiry, spam_window, broadcaster.clone());
        (broadcaster, tracker)
    }

    #[tokio::test]
    async fn start_broadcasts_once_per_spam_window() {
        let (broadcaster, tracker) = tracker(Duration::from_secs(5), Duration::from_millis(50));
        let user = UserId("u1".into());
        let conv = ConversationId("c1".into());

        tracker.start(&user, &conv).await;
        tracker.start(&user, &conv).await; // within spam window, ignored

        assert_eq!(broadcaster.starts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_after_spam_window_broadcasts_again() {
        let (broadcaster, tracker) = tracker(Duration::from_secs(5), Duration::from_millis(10));
        let user = UserId("u1".into());
        let conv = ConversationId("c1".into());

        tracker.start(&user, &conv).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.start(&user, &conv).await;

        assert_eq!(broadcaster.starts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn explicit_stop_broadcasts_and_cancels_expiry() {
        let (broadcaster, tracker) = tracker(Duration::from_millis(30), Duration::from_millis(5));
        let user = UserId("u1".into());
        let conv = ConversationId("c1".into());

        tracker.start(&user, &conv).await;
        tracker.stop(&user, &conv).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One stop from the explicit call; the expiry task must see it was
        // superseded and must not fire a second one.
        assert_eq!(broadcaster.stops.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expiry_fires_stop_after_five_seconds_equivalent() {
        let (broadcaster, tracker) = tracker(Duration::from_millis(20), Duration::from_millis(5));
        let user = UserId("u1".into());
        let conv = ConversationId("c1".into());

        tracker.start(&user, &conv).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(broadcaster.stops.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_user_stops_every_conversation_for_that_user() {
        let (broadcaster, tracker) = tracker(Duration::from_secs(5), Duration::from_millis(5));
        let user = UserId("u1".into());
        let c1 = ConversationId("c1".into());
        let c2 = ConversationId("c2".into());

        tracker.start(&user, &c1).await;
        tracker.start(&user, &c2).await;
        tracker.purge_user(&user).await;

        assert_eq!(broadcaster.stops.lock().unwrap().len(), 2);
    }
}
