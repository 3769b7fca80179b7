//! Configuration: per-provider settings (§6.3) and hub-wide tuning.
//!
//! Resolution priority mirrors the teacher SDK's `get_base_url`/`get_model`
//! helpers: an explicit value wins, an environment variable overrides it when
//! the caller asks for that, and a hardcoded default is the last resort.

use crate::error::{Error, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Supported upstream LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAiCompatible,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai_compatible" | "openai-compatible" => Ok(ProviderKind::OpenAiCompatible),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            _ => Err(format!("unknown provider kind: {s}")),
        }
    }
}

/// Per-provider configuration, consumed by the Provider Factory (§4.7) and
/// the adapter it constructs.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub credential: String,
    pub default_model: String,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_url: Option<String>,
    pub organization: Option<String>,
}

impl ProviderConfig {
    /// Validation rules from §4.7: provider kind must be constructible,
    /// credential non-empty, default model non-empty, max-tokens > 0,
    /// timeout > 0, max-retries >= 0 (always true for `u32`).
    pub fn validate(&self) -> Result<()> {
        if self.credential.trim().is_empty() {
            return Err(Error::validation("provider credential must not be empty"));
        }
        if self.default_model.trim().is_empty() {
            return Err(Error::validation("provider default model must not be empty"));
        }
        if self.max_output_tokens == 0 {
            return Err(Error::validation("provider max_output_tokens must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("provider timeout must be > 0"));
        }
        Ok(())
    }

    /// A stable cache key for the Provider Factory: `(kind, hash(credential),
    /// organization)`. The model id is deliberately excluded from the key.
    pub fn cache_key(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.credential.hash(&mut hasher);
        let credential_hash = hasher.finish();

        format!(
            "{}:{:x}:{}",
            self.kind.as_str(),
            credential_hash,
            self.organization.as_deref().unwrap_or("")
        )
    }
}

/// Resolve a provider's base URL: explicit value, then environment override,
/// then a default the caller supplies.
pub fn resolve_base_url(explicit: Option<&str>, env_var: &str, default: &str) -> String {
    if let Some(url) = explicit {
        return url.to_string();
    }
    if let Ok(url) = env::var(env_var) {
        return url;
    }
    default.to_string()
}

/// Resolve a model name with optional environment override, mirroring the
/// teacher's `get_model(fallback, prefer_env)`.
pub fn resolve_model(fallback: Option<&str>, env_var: &str, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var(env_var) {
            return Some(model);
        }
    }
    fallback.map(|s| s.to_string())
}

/// Hub-wide tuning knobs: heartbeat cadence, per-connection rate limit,
/// typing expiry, breaker and retry defaults. Every field has a hardcoded
/// default from the spec and can be overridden by environment variable.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// §4.8: ping cadence.
    pub heartbeat_interval: Duration,
    /// §4.3: inbound message cap per connection...
    pub rate_limit_max_messages: u32,
    /// ...per this window.
    pub rate_limit_window: Duration,
    /// §4.10: typing auto-expiry.
    pub typing_expiry: Duration,
    /// §4.10: spam-prevention window between typing:start refreshes.
    pub typing_spam_window: Duration,
    /// §4.11: last-K messages loaded for history.
    pub history_window: usize,
    /// §3: maximum message content length.
    pub max_message_content_len: usize,
    /// §4.4 retry defaults.
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter_factor: f64,
    /// §4.5 breaker defaults.
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_timeout: Duration,
    pub breaker_monitoring_window: Duration,
    /// §5: per-call provider timeouts.
    pub send_timeout: Duration,
    pub stream_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            rate_limit_max_messages: 10,
            rate_limit_window: Duration::from_secs(60),
            typing_expiry: Duration::from_secs(5),
            typing_spam_window: Duration::from_secs(1),
            history_window: 50,
            max_message_content_len: crate::types::MAX_MESSAGE_CONTENT_LEN,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(32_000),
            retry_jitter_factor: 0.1,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_timeout: Duration::from_secs(60),
            breaker_monitoring_window: Duration::from_secs(120),
            send_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(600),
        }
    }
}

impl HubConfig {
    /// Load from environment, falling back to spec defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heartbeat_interval: env_duration_secs("CHAT_HUB_HEARTBEAT_INTERVAL_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            rate_limit_max_messages: env_u32("CHAT_HUB_RATE_LIMIT_MAX_MESSAGES")
                .unwrap_or(defaults.rate_limit_max_messages),
            rate_limit_window: env_duration_secs("CHAT_HUB_RATE_LIMIT_WINDOW_SECS")
                .unwrap_or(defaults.rate_limit_window),
            ..defaults
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_duration_secs(key: &str) -> Option<Duration> {
    env_u32(key).map(|secs| Duration::from_secs(secs as u64))
}
