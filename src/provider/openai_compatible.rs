//! OpenAI-compatible provider adapter.
//!
//! Streaming parse follows the teacher SDK's `parse_sse_stream` /
//! `ToolCallAggregator` pattern (`client.rs`, `utils.rs`), simplified to
//! text-only deltas: non-text deltas are out of scope per the spec's Open
//! Question #3 and are logged at `debug` rather than erroring.

use crate::breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::error::{Error, RateLimitInfo, Result};
use crate::retry::{RateLimitCoordinator, RetryConfig};
use crate::types::TokenUsage;
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    compute_cost, select_model, validate_system_prompt, ChatParams, ChatResult, ProviderAdapter,
    ProviderMetadata, StreamSink,
};

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub provider_id: String,
    pub base_url: String,
    pub credential: String,
    pub organization: Option<String>,
    pub default_model: String,
    pub metadata: ProviderMetadata,
    pub send_timeout: Duration,
    pub stream_timeout: Duration,
    pub system_prompt_min_len: usize,
    pub system_prompt_max_len: usize,
}

pub struct OpenAiCompatibleAdapter {
    http: reqwest::Client,
    config: OpenAiCompatibleConfig,
    breaker: CircuitBreakerRegistry,
    coordinator: RateLimitCoordinator,
}

impl OpenAiCompatibleAdapter {
    pub fn new(config: OpenAiCompatibleConfig, retry: RetryConfig, breaker: BreakerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.stream_timeout.max(config.send_timeout))
            .build()
            .map_err(|e| Error::internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            config,
            breaker: CircuitBreakerRegistry::new(breaker),
            coordinator: RateLimitCoordinator::new(retry),
        })
    }

    fn breaker_key(&self, model: &str, kind: &str) -> String {
        format!("{}:{}:{}", self.config.provider_id, model, kind)
    }

    fn build_request(&self, params: &ChatParams, model: &str, stream: bool) -> Result<OpenAiChatRequest> {
        validate_system_prompt(
            params.system_prompt.as_deref(),
            self.config.system_prompt_min_len,
            self.config.system_prompt_max_len,
        )?;

        let mut messages = Vec::new();
        if let Some(prompt) = &params.system_prompt {
            if !prompt.is_empty() {
                messages.push(OpenAiChatMessage {
                    role: "system".to_string(),
                    content: prompt.clone(),
                });
            }
        }
        for turn in &params.history {
            messages.push(OpenAiChatMessage {
                role: role_str(turn.role).to_string(),
                content: turn.content.clone(),
            });
        }

        Ok(OpenAiChatRequest {
            model: model.to_string(),
            messages,
            stream,
            max_tokens: params.max_output_tokens,
        })
    }

    async fn post(&self, request: &OpenAiChatRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut builder = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.credential))
            .header("Content-Type", "application/json");
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder.json(request).send().await.map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(map_http_status(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn metadata(&self) -> &ProviderMetadata {
        &self.config.metadata
    }

    async fn test_connection(&self) -> Result<bool> {
        let model = select_model(&self.config.metadata, &self.config.default_model, None)?;
        let request = self.build_request(
            &ChatParams {
                message_id: crate::types::MessageId("probe".into()),
                model_override: None,
                system_prompt: None,
                history: vec![super::ChatTurn {
                    role: crate::types::MessageRole::User,
                    content: "ping".into(),
                }],
                max_output_tokens: Some(1),
            },
            &model.id,
            false,
        )?;
        match self.post(&request).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == crate::error::ErrorKind::Authentication => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn send(&self, params: ChatParams) -> Result<ChatResult> {
        let model = select_model(
            &self.config.metadata,
            &self.config.default_model,
            params.model_override.as_deref(),
        )?
        .clone();
        let request = self.build_request(&params, &model.id, false)?;
        let key = self.breaker_key(&model.id, "send");

        let response = self
            .breaker
            .execute(&key, None, || {
                self.coordinator.execute_with_retry("send", || self.post(&request))
            })
            .await?;

        let body: OpenAiChatResponse = response.json().await.map_err(map_reqwest_error)?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("provider returned no choices"))?;

        let usage = body.usage.unwrap_or_default().into_token_usage();
        let cost = compute_cost(&model, &usage);

        Ok(ChatResult {
            content: choice.message.content,
            token_usage: usage,
            cost,
            model: model.id.clone(),
            stop_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            provider_id: self.config.provider_id.clone(),
        })
    }

    async fn stream(&self, params: ChatParams, sink: &mut dyn StreamSink) -> Result<ChatResult> {
        let model = select_model(
            &self.config.metadata,
            &self.config.default_model,
            params.model_override.as_deref(),
        )?
        .clone();
        let request = self.build_request(&params, &model.id, true)?;
        let key = self.breaker_key(&model.id, "stream");
        let message_id = params.message_id.clone();

        let response = self
            .breaker
            .execute(&key, None, || {
                self.coordinator.execute_with_retry("stream", || self.post(&request))
            })
            .await?;

        sink.on_start(&message_id, &model.id).await;

        let mut cumulative = String::new();
        let mut usage = TokenUsage::default();
        let mut stop_reason: Option<String> = None;
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let err = map_reqwest_error(e);
                    sink.on_error(&err).await;
                    return Err(err);
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);

                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        stop_reason.get_or_insert_with(|| "stop".to_string());
                        continue;
                    }

                    let parsed: OpenAiStreamChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            debug!(error = %e, "ignoring unparsable stream chunk");
                            continue;
                        }
                    };

                    if let Some(chunk_usage) = parsed.usage {
                        usage = chunk_usage.into_token_usage();
                    }

                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            cumulative.push_str(&content);
                            sink.on_delta(&content).await;
                        }
                        if choice.delta.tool_calls.is_some() {
                            debug!("ignoring non-text delta (tool call) out of scope");
                        }
                        if let Some(reason) = choice.finish_reason {
                            stop_reason = Some(reason);
                        }
                    }
                }
            }
        }

        match stop_reason {
            Some(reason) => {
                let cost = compute_cost(&model, &usage);
                let result = ChatResult {
                    content: cumulative,
                    token_usage: usage,
                    cost,
                    model: model.id.clone(),
                    stop_reason: reason,
                    provider_id: self.config.provider_id.clone(),
                };
                sink.on_complete(&result).await;
                Ok(result)
            }
            None => {
                let err = Error::stream_interrupted("provider stream ended before completion")
                    .with_context("partial_content", cumulative);
                sink.on_error(&err).await;
                Err(err)
            }
        }
    }
}

fn role_str(role: crate::types::MessageRole) -> &'static str {
    match role {
        crate::types::MessageRole::User => "user",
        crate::types::MessageRole::Assistant => "assistant",
        crate::types::MessageRole::System => "system",
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(e.to_string()).with_source(e)
    } else {
        Error::network(e.to_string()).with_source(e)
    }
}

async fn map_http_status(response: reqwest::Response) -> Error {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 | 403 => Error::authentication(format!("provider rejected credentials: {body}")),
        400 | 404 | 422 => Error::invalid_request(format!("provider rejected request ({status}): {body}")),
        429 => {
            let mut err = Error::rate_limit(format!("provider rate limited ({status})"));
            if let Some(secs) = retry_after {
                err = err.with_rate_limit(RateLimitInfo {
                    retry_after_secs: Some(secs),
                    ..Default::default()
                });
            }
            err
        }
        500..=599 => Error::internal(format!("provider server error ({status}): {body}")),
        _ => Error::unknown(format!("unexpected provider response ({status}): {body}")),
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoiceFull>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceFull {
    message: OpenAiChatMessageOwned,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatMessageOwned {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiUsage {
    fn into_token_usage(self) -> TokenUsage {
        TokenUsage {
            input: self.prompt_tokens,
            output: self.completion_tokens,
            total: if self.total_tokens > 0 {
                self.total_tokens
            } else {
                self.prompt_tokens + self.completion_tokens
            },
        }
    }
}
