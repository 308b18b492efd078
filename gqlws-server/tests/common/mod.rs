//! Shared fixtures for the integration tests.
//!
//! [`TestExecutor`] answers a handful of fixed queries and counts how many
//! long-running operations were dropped before finishing, which is how the
//! tests observe cancellation.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use gqlws_server::{
    protocol::{ExecutionResult, GraphQlError, GraphQlRequest},
    ExecuteResult, Executor, OperationContext, OperationResult,
};
use serde_json::{json, Value};

pub const HELLO: &str = "{ hello }";
pub const INIT: &str = "{ init }";
pub const SLOW: &str = "{ slow }";
pub const INVALID: &str = "{ invalid }";
pub const TICKS: &str = "subscription { ticks }";
pub const FOREVER: &str = "subscription { forever }";
pub const FAILING: &str = "subscription { failing }";

// ════════════════════════════════════════════════════════════════════
// TestExecutor
// ════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Counts a cancellation when dropped before being defused.
struct CancelGuard {
    counters: Arc<Counters>,
    armed: bool,
}

impl CancelGuard {
    fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct TestExecutor {
    counters: Arc<Counters>,
}

impl TestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `execute` calls so far.
    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Number of `{ slow }` / `forever` operations dropped before finishing.
    pub fn cancelled(&self) -> usize {
        self.counters.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` cancellations were observed.
    pub async fn wait_for_cancelled(&self, n: usize) {
        let wait = async {
            while self.cancelled() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("expected {} cancellations, saw {}", n, self.cancelled()));
    }
}

fn data(value: Value) -> ExecutionResult {
    ExecutionResult::data(value)
}

#[async_trait]
impl Executor for TestExecutor {
    async fn execute(&self, request: GraphQlRequest, ctx: OperationContext) -> ExecuteResult {
        self.counters.started.fetch_add(1, Ordering::SeqCst);

        match request.query.as_str() {
            HELLO => Ok(OperationResult::single(data(json!({ "hello": "world" })))),

            INIT => Ok(OperationResult::single(data(json!({
                "init": ctx.init_payload.as_deref().cloned(),
                "operation": ctx.operation_id,
            })))),

            SLOW => {
                let guard = CancelGuard::new(self.counters.clone());
                tokio::time::sleep(Duration::from_secs(3600)).await;
                guard.defuse();
                Ok(OperationResult::single(data(json!({ "slow": true }))))
            }

            INVALID => Err(vec![GraphQlError::new(
                "Cannot query field \"invalid\" on type \"Query\".",
            )
            .at(1, 3)]),

            TICKS => {
                let count = request
                    .variables
                    .as_ref()
                    .and_then(|vars| vars.get("count"))
                    .and_then(Value::as_u64)
                    .unwrap_or(3);
                Ok(OperationResult::stream(stream::iter(1..=count).then(
                    |n| async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok(data(json!({ "ticks": n })))
                    },
                )))
            }

            FOREVER => {
                let guard = CancelGuard::new(self.counters.clone());
                Ok(OperationResult::stream(stream::unfold(
                    (0u64, guard),
                    |(n, guard)| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Some((Ok(data(json!({ "forever": n }))), (n + 1, guard)))
                    },
                )))
            }

            FAILING => Ok(OperationResult::stream(stream::iter(vec![
                Ok(data(json!({ "n": 1 }))),
                Err(vec![GraphQlError::new("stream failed")]),
            ]))),

            other => Err(vec![GraphQlError::new(format!("Unknown query: {}", other))]),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Message builders
// ════════════════════════════════════════════════════════════════════

pub fn connection_init() -> Value {
    json!({ "type": "connection_init" })
}

pub fn subscribe(id: &str, query: &str) -> Value {
    json!({ "id": id, "type": "subscribe", "payload": { "query": query } })
}

pub fn subscribe_ticks(id: &str, count: u64) -> Value {
    json!({
        "id": id,
        "type": "subscribe",
        "payload": { "query": TICKS, "variables": { "count": count } },
    })
}

pub fn complete(id: &str) -> Value {
    json!({ "id": id, "type": "complete" })
}

pub fn ping() -> Value {
    json!({ "type": "ping" })
}

pub fn next_ticks(id: &str, n: u64) -> Value {
    json!({ "id": id, "type": "next", "payload": { "data": { "ticks": n } } })
}

pub fn completed(id: &str) -> Value {
    json!({ "id": id, "type": "complete" })
}
