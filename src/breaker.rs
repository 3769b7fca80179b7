//! Circuit Breaker Registry (component F, §4.5).
//!
//! A keyed set of breakers guarding expensive operations (in practice, one
//! breaker per `(provider, model, kind)` tuple per §4.6). Each breaker is an
//! independent `closed -> open -> half-open -> closed` state machine;
//! mutation of one key's state never blocks another.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub monitoring_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(120),
        }
    }
}

/// Point-in-time stats for a single breaker key, returned by `get_stats`.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failures_in_window: usize,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

struct BreakerEntry {
    config: BreakerConfig,
    state: BreakerState,
    failure_timestamps: Vec<Instant>,
    consecutive_successes: u32,
    next_attempt_at: Option<Instant>,
    half_open_trial_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerEntry {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_timestamps: Vec::new(),
            consecutive_successes: 0,
            next_attempt_at: None,
            half_open_trial_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn prune_window(&mut self, now: Instant) {
        let window = self.config.monitoring_window;
        self.failure_timestamps.retain(|&t| now.duration_since(t) <= window);
    }

    /// Returns `Err` if the call should be rejected without invoking the
    /// wrapped thunk: either the breaker is `open` and not yet due for a
    /// trial, or it is `half-open` and the one permitted trial is already
    /// in flight (§4.5: "permit one trial", §8 property 3).
    fn admit(&mut self, key: &str, now: Instant) -> std::result::Result<(), Error> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if self.half_open_trial_in_flight {
                    self.total_rejections += 1;
                    Err(Error::overloaded(format!(
                        "circuit breaker half-open trial already in flight for {key}"
                    )))
                } else {
                    self.half_open_trial_in_flight = true;
                    Ok(())
                }
            }
            BreakerState::Open => {
                let next = self.next_attempt_at.unwrap_or(now);
                if now >= next {
                    self.state = BreakerState::HalfOpen;
                    self.consecutive_successes = 0;
                    self.half_open_trial_in_flight = true;
                    info!(key, "breaker transitioning to half-open");
                    Ok(())
                } else {
                    self.total_rejections += 1;
                    let remaining = next.saturating_duration_since(now);
                    Err(Error::overloaded(format!(
                        "circuit breaker open for {key}, try again in {}s",
                        remaining.as_secs().max(1)
                    )))
                }
            }
        }
    }

    fn record_success(&mut self, key: &str, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.failure_timestamps.clear();
            }
            BreakerState::HalfOpen => {
                self.consecutive_successes += 1;
                self.half_open_trial_in_flight = false;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.failure_timestamps.clear();
                    self.consecutive_successes = 0;
                    self.next_attempt_at = None;
                    info!(key, "breaker closed after successful trial");
                }
            }
            BreakerState::Open => {}
        }
        let _ = now;
    }

    fn record_failure(&mut self, key: &str, now: Instant) {
        self.total_failures += 1;
        match self.state {
            BreakerState::Closed => {
                self.prune_window(now);
                self.failure_timestamps.push(now);
                if self.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    self.trip(key, now);
                }
            }
            BreakerState::HalfOpen => {
                self.trip(key, now);
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&mut self, key: &str, now: Instant) {
        self.state = BreakerState::Open;
        self.next_attempt_at = Some(now + self.config.timeout);
        self.consecutive_successes = 0;
        self.half_open_trial_in_flight = false;
        warn!(key, timeout_secs = self.config.timeout.as_secs(), "breaker opened");
    }

    fn stats(&self, now: Instant) -> BreakerStats {
        let window = self.config.monitoring_window;
        BreakerStats {
            state: self.state,
            failures_in_window: self
                .failure_timestamps
                .iter()
                .filter(|&&t| now.duration_since(t) <= window)
                .count(),
            consecutive_successes: self.consecutive_successes,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            total_rejections: self.total_rejections,
        }
    }
}

/// Keyed registry of circuit breakers. Cheap to clone; all state lives
/// behind the inner `DashMap` so clones share the same breakers.
#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: std::sync::Arc<DashMap<String, Mutex<BreakerEntry>>>,
    default_config: BreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: std::sync::Arc::new(DashMap::new()),
            default_config,
        }
    }

    /// `execute(key, thunk, config?)`. Runs `thunk` guarded by the breaker
    /// for `key`, creating it with `config` (or the registry default) on
    /// first use.
    pub async fn execute<F, Fut, T>(&self, key: &str, config: Option<BreakerConfig>, thunk: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry_lock = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(BreakerEntry::new(config.unwrap_or_else(|| self.default_config.clone()))));

        {
            let mut entry = entry_lock.lock().unwrap();
            entry.total_calls += 1;
            let now = Instant::now();
            entry.admit(key, now)?;
        }

        match thunk().await {
            Ok(value) => {
                entry_lock.lock().unwrap().record_success(key, Instant::now());
                Ok(value)
            }
            Err(err) => {
                entry_lock.lock().unwrap().record_failure(key, Instant::now());
                Err(err)
            }
        }
    }

    pub fn get_stats(&self, key: &str) -> Option<BreakerStats> {
        self.breakers
            .get(key)
            .map(|entry| entry.lock().unwrap().stats(Instant::now()))
    }

    pub fn reset_all(&self) {
        self.breakers.clear();
    }
}
