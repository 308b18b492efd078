//! gqlws Executor Contract
//!
//! Pure trait definitions for the boundary between the subprotocol engine and
//! a GraphQL execution engine. The engine depends on these abstractions
//! rather than on a concrete schema or resolver implementation.
//!
//! # Contract
//!
//! [`Executor::execute`] receives one parsed [`GraphQlRequest`] and returns:
//!
//! 1. **[`OperationResult::Single`]** - queries and mutations. The engine
//!    sends exactly one `next` followed by `complete`.
//! 2. **[`OperationResult::Stream`]** - subscriptions. The engine sends one
//!    `next` per `Ok` item, then `complete` when the stream ends, or a single
//!    `error` if the stream yields `Err`.
//! 3. **`Err(errors)`** - the request failed before producing any result
//!    (for example validation). The engine sends a single `error`.
//!
//! # Cancellation
//!
//! Cancellation is cooperative and happens by drop: when the client sends
//! `complete`, or the connection closes, the engine drops the pending
//! `execute` future or the [`ResponseStream`]. Implementations release their
//! resources in `Drop` and must not rely on being polled to completion.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, Stream, StreamExt};

pub use gqlws_protocol::{ExecutionResult, GraphQlError, GraphQlRequest};
use serde_json::Value;

// ============================================================================
// Types
// ============================================================================

/// Identifier of one transport session, unique within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-operation context handed to [`Executor::execute`].
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub connection_id: ConnectionId,
    /// Client-chosen operation id (`subscribe.id`).
    pub operation_id: String,
    /// Payload of the accepted `connection_init`, if the client sent one.
    pub init_payload: Option<Arc<Value>>,
}

impl OperationContext {
    pub fn new(connection_id: ConnectionId, operation_id: impl Into<String>) -> Self {
        Self {
            connection_id,
            operation_id: operation_id.into(),
            init_payload: None,
        }
    }

    pub fn with_init_payload(mut self, payload: Option<Arc<Value>>) -> Self {
        self.init_payload = payload;
        self
    }
}

/// Items of a streaming operation. An `Err` terminates the stream.
pub type StreamItem = Result<ExecutionResult, Vec<GraphQlError>>;

/// Cancellable result stream of a subscription operation.
pub type ResponseStream = BoxStream<'static, StreamItem>;

/// Outcome of [`Executor::execute`].
pub type ExecuteResult = Result<OperationResult, Vec<GraphQlError>>;

/// What an operation produces.
pub enum OperationResult {
    /// Exactly one result (query, mutation).
    Single(ExecutionResult),
    /// Zero or more results (subscription).
    Stream(ResponseStream),
}

impl OperationResult {
    pub fn single(result: ExecutionResult) -> Self {
        OperationResult::Single(result)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamItem> + Send + 'static,
    {
        OperationResult::Stream(stream.boxed())
    }

    /// Turn any result into a stream, so single results can share a code path
    /// with subscriptions.
    pub fn into_stream(self) -> ResponseStream {
        match self {
            OperationResult::Single(result) => {
                futures_util::stream::once(async move { Ok(result) }).boxed()
            }
            OperationResult::Stream(stream) => stream,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OperationResult::Stream(_))
    }
}

impl fmt::Debug for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Single(result) => f.debug_tuple("Single").field(result).finish(),
            OperationResult::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ============================================================================
// Executor trait
// ============================================================================

/// The GraphQL execution engine, seen from the subprotocol engine.
///
/// # Example
///
/// ```rust,ignore
/// use gqlws_executor::{Executor, ExecuteResult, OperationContext, OperationResult};
///
/// struct Hello;
///
/// #[async_trait::async_trait]
/// impl Executor for Hello {
///     async fn execute(&self, request: GraphQlRequest, _ctx: OperationContext) -> ExecuteResult {
///         Ok(OperationResult::single(ExecutionResult::data(json!({"hello": "world"}))))
///     }
/// }
/// ```
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, request: GraphQlRequest, ctx: OperationContext) -> ExecuteResult;
}

/// Type-erased executor shared by every connection of a server.
pub type DynExecutor = Arc<dyn Executor>;

// ============================================================================
// Closure adapter
// ============================================================================

/// [`Executor`] backed by an async closure.
pub struct FnExecutor<F>(F);

/// Wrap an async closure as an [`Executor`].
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(GraphQlRequest, OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecuteResult> + Send + 'static,
{
    FnExecutor(f)
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(GraphQlRequest, OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecuteResult> + Send + 'static,
{
    async fn execute(&self, request: GraphQlRequest, ctx: OperationContext) -> ExecuteResult {
        (self.0)(request, ctx).await
    }
}

// ============================================================================
// Tests
// ============================================================================
