//! # chat-hub
//!
//! A real-time chat backend brokering messages between WebSocket clients and
//! streaming LLM providers, with rate-limit-aware retry and circuit
//! breaking.
//!
//! ## Architecture
//!
//! A connection moves through `connecting -> authenticating -> active ->
//! closing` ([`state_machine`]) under the [`connection::ConnectionManager`],
//! which is the sole authoritative index of live sockets, users, and
//! conversations. Once active, inbound `message:send` frames flow through
//! the [`bridge::AiIntegrationBridge`]: validate, persist the user message,
//! call a [`provider::ProviderAdapter`] (wrapped in [`retry`]'s rate-limit
//! coordinator and [`breaker`]'s circuit breaker), stream deltas back to the
//! conversation, then persist the assistant reply with token/cost metadata.
//!
//! Typing indicators ([`typing`]), per-connection rate limiting
//! ([`rate_limiter`]), liveness probing ([`heartbeat`]), and exactly-once
//! teardown ([`cleanup`]) round out the connection lifecycle. [`hub`] wires
//! all of it into an axum WebSocket route; `chat-hub-server`'s `main.rs` is
//! the runnable binary.
//!
//! Persistence ([`repository`]) and authentication ([`auth`]) are modeled as
//! traits with in-memory/static implementations suitable for development —
//! the backing store and credential issuance are out of scope for this
//! crate and are swap-in points for a real deployment.

pub mod auth;
pub mod breaker;
pub mod bridge;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod frames;
pub mod heartbeat;
pub mod hub;
pub mod provider;
pub mod rate_limiter;
pub mod repository;
pub mod retry;
pub mod state_machine;
pub mod types;
pub mod typing;

pub use error::{Error, ErrorKind, Result};
pub use types::{Conversation, Message, MessageRole, UserId};
