//! Provider Adapter contract (component G, §4.6) and the factory that
//! constructs/caches adapter instances (component H, §4.7).

pub mod factory;
pub mod openai_compatible;

use crate::error::{Error, Result};
use crate::types::{Cost, MessageId, TokenUsage};
use async_trait::async_trait;

/// Capability flags a provider may advertise in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Streaming,
    Vision,
    FunctionCalling,
    PromptCaching,
    JsonMode,
}

/// One selectable model, with pricing and limits, per §4.6 `metadata()`.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// Dollars per million input tokens.
    pub input_price_per_million: f64,
    /// Dollars per million output tokens.
    pub output_price_per_million: f64,
    pub deprecated: bool,
}

/// Static description of a provider adapter: name, capabilities, models.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub models: Vec<ModelDescriptor>,
}

impl ProviderMetadata {
    pub fn find_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// One role-tagged chat turn as handed to a provider adapter. Distinct from
/// [`crate::types::Message`]: it carries only what a provider call needs,
/// not persistence metadata.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: crate::types::MessageRole,
    pub content: String,
}

/// Parameters for one `send`/`stream` call (§4.6).
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub message_id: MessageId,
    pub model_override: Option<String>,
    pub system_prompt: Option<String>,
    pub history: Vec<ChatTurn>,
    pub max_output_tokens: Option<u32>,
}

/// Structured result returned by both `send` and `stream`.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: String,
    pub token_usage: TokenUsage,
    pub cost: Cost,
    pub model: String,
    pub stop_reason: String,
    pub provider_id: String,
}

/// Sink a streaming call emits events to. A single producer (the adapter),
/// a single consumer (the caller) per call; the adapter must not block its
/// provider loop waiting on a slow consumer (§9 "Promise-based stream
/// callback").
#[async_trait]
pub trait StreamSink: Send {
    async fn on_start(&mut self, message_id: &MessageId, model: &str);
    async fn on_delta(&mut self, content: &str);
    async fn on_complete(&mut self, result: &ChatResult);
    async fn on_error(&mut self, error: &Error);
}

/// Uniform contract every provider implements (§4.6).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    async fn test_connection(&self) -> Result<bool>;

    /// Non-streaming chat completion.
    async fn send(&self, params: ChatParams) -> Result<ChatResult>;

    /// Streaming chat completion: emits `start -> delta* -> complete` to
    /// `sink`, or `error` followed by an `Err` return if the provider fails
    /// or the stream ends before `complete` is observed.
    async fn stream(&self, params: ChatParams, sink: &mut dyn StreamSink) -> Result<ChatResult>;
}

/// Select and validate a model id against a provider's metadata (§4.6
/// "Validating and selecting a model"): an explicit override must name a
/// known, non-deprecated model; absent an override, the adapter's default
/// model is used.
pub fn select_model<'a>(
    metadata: &'a ProviderMetadata,
    default_model: &str,
    override_id: Option<&str>,
) -> Result<&'a ModelDescriptor> {
    let wanted = override_id.unwrap_or(default_model);
    match metadata.find_model(wanted) {
        Some(model) if model.deprecated => Err(Error::invalid_request(format!(
            "model '{wanted}' is deprecated"
        ))),
        Some(model) => Ok(model),
        None => Err(Error::invalid_request(format!("unknown model '{wanted}'"))),
    }
}

/// Validate a system prompt against the configured length range (§4.6):
/// if non-empty, must be between `min_len` and `max_len` characters.
pub fn validate_system_prompt(prompt: Option<&str>, min_len: usize, max_len: usize) -> Result<()> {
    match prompt {
        None => Ok(()),
        Some(p) if p.is_empty() => Ok(()),
        Some(p) if p.chars().count() < min_len => Err(Error::validation(format!(
            "system prompt shorter than minimum {min_len} characters"
        ))),
        Some(p) if p.chars().count() > max_len => Err(Error::validation(format!(
            "system prompt longer than maximum {max_len} characters"
        ))),
        Some(_) => Ok(()),
    }
}

/// Compute dollar cost from a model's pricing table and reported usage.
pub fn compute_cost(model: &ModelDescriptor, usage: &TokenUsage) -> Cost {
    let input = (usage.input as f64 / 1_000_000.0) * model.input_price_per_million;
    let output = (usage.output as f64 / 1_000_000.0) * model.output_price_per_million;
    Cost {
        input,
        output,
        total: input + output,
        currency: "USD",
    }
}
