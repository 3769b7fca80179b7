//! Per-Connection Rate Limiter (component K, §4.3): a fixed-window counter
//! bounding inbound message-producing frames per connection. Typing and
//! heartbeat frames never pass through here.

use crate::types::ConnectionId;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    started_at: Instant,
    count: u32,
}

/// Keyed fixed-window limiter, one window per connection. Each key's mutex
/// is independent; checking one connection never blocks another.
pub struct RateLimiterRegistry {
    windows: DashMap<ConnectionId, Mutex<Window>>,
    max_messages: u32,
    window: Duration,
}

impl RateLimiterRegistry {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self { windows: DashMap::new(), max_messages, window }
    }

    /// Returns `true` if the frame is admitted, `false` if the connection
    /// has exceeded its quota for the current window.
    pub fn check(&self, connection_id: &ConnectionId) -> bool {
        let entry = self
            .windows
            .entry(connection_id.clone())
            .or_insert_with(|| Mutex::new(Window { started_at: Instant::now(), count: 0 }));

        let mut state = entry.lock().unwrap();
        let now = Instant::now();
        if now.duration_since(state.started_at) >= self.window {
            state.started_at = now;
            state.count = 0;
        }

        if state.count >= self.max_messages {
            false
        } else {
            state.count += 1;
            true
        }
    }

    /// Removes the window for a disconnected connection (step 3 of cleanup,
    /// §4.9).
    pub fn remove(&self, connection_id: &ConnectionId) {
        self.windows.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_then_rejects() {
        let limiter = RateLimiterRegistry::new(3, Duration::from_secs(60));
        let conn = ConnectionId("c1".into());
        assert!(limiter.check(&conn));
        assert!(limiter.check(&conn));
        assert!(limiter.check(&conn));
        assert!(!limiter.check(&conn));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiterRegistry::new(1, Duration::from_millis(20));
        let conn = ConnectionId("c1".into());
        assert!(limiter.check(&conn));
        assert!(!limiter.check(&conn));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.check(&conn));
    }

    #[test]
    fn connections_are_independent() {
        let limiter = RateLimiterRegistry::new(1, Duration::from_secs(60));
        let a = ConnectionId("a".into());
        let b = ConnectionId("b".into());
        assert!(limiter.check(&a));
        assert!(!limiter.check(&a));
        assert!(limiter.check(&b));
    }

    #[test]
    fn remove_forgets_the_window() {
        let limiter = RateLimiterRegistry::new(1, Duration::from_secs(60));
        let conn = ConnectionId("c1".into());
        assert!(limiter.check(&conn));
        assert!(!limiter.check(&conn));
        limiter.remove(&conn);
        assert!(limiter.check(&conn));
    }
}
