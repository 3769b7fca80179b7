//! `chat-hub-server`: the runnable binary. Wires the Provider Factory (H),
//! an in-memory repository and static token verifier (swap-in points for a
//! real deployment, per §1's out-of-scope external systems), the AI
//! Integration Bridge (O), and the hub's WebSocket route into one axum
//! server, the way the teacher SDK's own example binaries wire a client
//! plus provider config from environment variables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_hub::auth::StaticTokenVerifier;
use chat_hub::bridge::{AiIntegrationBridge, BridgeConfig};
use chat_hub::config::{resolve_base_url, HubConfig, ProviderConfig, ProviderKind};
use chat_hub::hub::Hub;
use chat_hub::provider::factory::ProviderFactory;
use chat_hub::provider::openai_compatible::{OpenAiCompatibleAdapter, OpenAiCompatibleConfig};
use chat_hub::provider::{Capability, ModelDescriptor, ProviderMetadata};
use chat_hub::repository::InMemoryRepository;
use chat_hub::retry::RetryConfig;
use chat_hub::breaker::BreakerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let hub_config = HubConfig::from_env();

    let provider_config = ProviderConfig {
        kind: ProviderKind::OpenAiCompatible,
        credential: std::env::var("CHAT_HUB_PROVIDER_API_KEY")
            .unwrap_or_else(|_| "sk-local-dev".to_string()),
        default_model: std::env::var("CHAT_HUB_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        max_output_tokens: 4096,
        timeout: hub_config.send_timeout,
        max_retries: hub_config.retry_max_attempts,
        base_url: None,
        organization: std::env::var("CHAT_HUB_PROVIDER_ORG").ok(),
    };

    let factory = ProviderFactory::new();
    factory.register(ProviderKind::OpenAiCompatible, {
        let hub_config = hub_config.clone();
        move |config: &ProviderConfig| {
            let metadata = default_openai_metadata(&config.default_model);
            let adapter_config = OpenAiCompatibleConfig {
                provider_id: "openai-compatible".to_string(),
                base_url: resolve_base_url(
                    config.base_url.as_deref(),
                    "CHAT_HUB_PROVIDER_BASE_URL",
                    "https://api.openai.com/v1",
                ),
                credential: config.credential.clone(),
                organization: config.organization.clone(),
                default_model: config.default_model.clone(),
                metadata,
                send_timeout: hub_config.send_timeout,
                stream_timeout: hub_config.stream_timeout,
                system_prompt_min_len: 0,
                system_prompt_max_len: 32_000,
            };
            let retry = RetryConfig {
                max_attempts: hub_config.retry_max_attempts,
                base_delay: hub_config.retry_base_delay,
                max_delay: hub_config.retry_max_delay,
                jitter_factor: hub_config.retry_jitter_factor,
            };
            let breaker = BreakerConfig {
                failure_threshold: hub_config.breaker_failure_threshold,
                success_threshold: hub_config.breaker_success_threshold,
                timeout: hub_config.breaker_timeout,
                monitoring_window: hub_config.breaker_monitoring_window,
            };
            let adapter = OpenAiCompatibleAdapter::new(adapter_config, retry, breaker)?;
            Ok(Arc::new(adapter) as Arc<dyn chat_hub::provider::ProviderAdapter>)
        }
    });

    let provider = factory.create(&provider_config, false)?;

    let repository = Arc::new(InMemoryRepository::new());
    let verifier = Arc::new(StaticTokenVerifier::new());
    if let Ok(seed) = std::env::var("CHAT_HUB_DEV_CREDENTIAL") {
        let user_id = chat_hub::types::UserId(
            std::env::var("CHAT_HUB_DEV_USER_ID").unwrap_or_else(|_| "dev-user".to_string()),
        );
        verifier.issue(seed, user_id);
    }

    let connections = chat_hub::connection::ConnectionManager::new();

    let bridge = Arc::new(AiIntegrationBridge::new(
        repository,
        connections.clone(),
        provider,
        BridgeConfig {
            history_window: hub_config.history_window,
            min_content_len: 1,
            max_content_len: hub_config.max_message_content_len,
        },
    ));

    let hub = Arc::new(Hub::new(
        connections,
        verifier,
        bridge,
        hub_config.rate_limit_max_messages,
        hub_config.rate_limit_window,
        hub_config.typing_expiry,
        hub_config.typing_spam_window,
        hub_config.heartbeat_interval,
    ));
    hub.spawn_heartbeat();

    let app = hub.router().layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("CHAT_HUB_LISTEN_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    tracing::info!(%addr, "chat-hub-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn default_openai_metadata(default_model: &str) -> ProviderMetadata {
    ProviderMetadata {
        name: "openai-compatible".to_string(),
        capabilities: vec![Capability::Streaming, Capability::FunctionCalling],
        models: vec![ModelDescriptor {
            id: default_model.to_string(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            input_price_per_million: 0.15,
            output_price_per_million: 0.60,
            deprecated: false,
        }],
    }
}
