use chat_hub::breaker::{BreakerConfig, CircuitBreakerRegistry};
use chat_hub::connection::{Connection, ConnectionManager};
use chat_hub::context::{estimate_tokens, is_approaching_limit, truncate_messages};
use chat_hub::frames::ServerFrame;
use chat_hub::rate_limiter::RateLimiterRegistry;
use chat_hub::types::{ConnectionId, ConversationId, Message, UserId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tokio::sync::mpsc;

fn create_messages(count: usize, text_size: usize) -> Vec<Message> {
    let text = "a".repeat(text_size);
    let conv = ConversationId("bench-conv".into());
    let user = UserId("bench-user".into());
    (0..count)
        .map(|i| {
            if i == 0 {
                Message::system(conv.clone(), text.clone())
            } else if i % 2 == 0 {
                Message::user(conv.clone(), user.clone(), text.clone())
            } else {
                Message::assistant(conv.clone(), text.clone())
            }
        })
        .collect()
}

fn bench_estimate_tokens_by_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_count");
    for count in [0, 1, 5, 10, 20, 50, 100].iter() {
        let messages = create_messages(*count, 100);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_estimate_tokens_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_size");
    for size in [10, 100, 1000, 10000].iter() {
        let messages = create_messages(10, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_truncate_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate_messages");
    let test_cases = vec![
        ("small_keep_5", create_messages(20, 100), 5, true),
        ("medium_keep_10", create_messages(50, 100), 10, true),
        ("large_keep_20", create_messages(100, 100), 20, true),
        ("no_preserve_system", create_messages(50, 100), 10, false),
    ];

    for (name, messages, keep, preserve) in test_cases {
        group.bench_with_input(
            BenchmarkId::new(name, format!("{}/{}", messages.len(), keep)),
            &(messages, keep, preserve),
            |b, (msgs, k, p)| {
                b.iter(|| truncate_messages(black_box(msgs), black_box(*k), black_box(*p)));
            },
        );
    }
    group.finish();
}

fn bench_is_approaching_limit(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_approaching_limit");
    for count in [10, 50, 100].iter() {
        let messages = create_messages(*count, 500);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| is_approaching_limit(black_box(msgs), black_box(32000), black_box(0.9)));
        });
    }
    group.finish();
}

/// Fan-out throughput: `send_to_conversation` over a growing participant
/// set, the hot path exercised on every assistant stream delta (§4.11).
fn bench_conversation_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversation_fan_out");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for participants in [1usize, 10, 50, 200].iter() {
        let manager = ConnectionManager::new();
        let conversation_id = ConversationId("bench-conv".into());
        let mut receivers = Vec::new();
        for i in 0..*participants {
            let (tx, rx) = mpsc::channel(participants * 2);
            let conn = std::sync::Arc::new(Connection::new(ConnectionId(format!("c{i}")), tx));
            manager.add(conn.clone());
            manager.index_by_user(&conn.id, UserId(format!("u{i}")));
            manager.attach_to_conversation(&conn.id, conversation_id.clone());
            receivers.push(rx);
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(participants),
            &(manager, conversation_id),
            |b, (manager, conversation_id)| {
                b.iter(|| {
                    manager.send_to_conversation(
                        black_box(conversation_id),
                        ServerFrame::Pong,
                        None,
                    );
                    runtime.block_on(async {
                        for rx in receivers.iter_mut() {
                            while rx.try_recv().is_ok() {}
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

/// Per-call overhead of routing a call through the circuit breaker when it
/// is closed (the common case) — §4.5.
fn bench_breaker_execute_when_closed(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let registry = CircuitBreakerRegistry::new(BreakerConfig::default());

    c.bench_function("breaker_execute_closed", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let _ = registry
                    .execute("bench-key", None, || async { Ok::<_, chat_hub::error::Error>(()) })
                    .await;
            });
        });
    });
}

/// Window-check throughput for the per-connection rate limiter (§4.3), the
/// gate every inbound `message:send` passes through.
fn bench_rate_limiter_check(c: &mut Criterion) {
    let limiter = RateLimiterRegistry::new(u32::MAX, Duration::from_secs(3600));
    let conn = ConnectionId("bench-conn".into());

    c.bench_function("rate_limiter_check", |b| {
        b.iter(|| black_box(limiter.check(black_box(&conn))));
    });
}

criterion_group!(
    benches,
    bench_estimate_tokens_by_count,
    bench_estimate_tokens_by_size,
    bench_truncate_messages,
    bench_is_approaching_limit,
    bench_conversation_fan_out,
    bench_breaker_execute_when_closed,
    bench_rate_limiter_check,
);
criterion_main!(benches);
