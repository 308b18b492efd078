//! Server-Sent-Events companion endpoint.
//!
//! `POST {sse_path}` with a JSON [`GraphQlRequest`] body runs one operation
//! and streams its results as SSE events:
//!
//! | event      | data                         |
//! |------------|------------------------------|
//! | `next`     | one `ExecutionResult`        |
//! | `error`    | list of `GraphQlError` (end) |
//! | `complete` | empty (end)                  |
//! | `ping`     | empty, keep-alive only       |
//!
//! The operation lives exactly as long as the response body: when the
//! client disconnects Axum drops the stream, which drops the executor's
//! result stream.

use std::{convert::Infallible, future::pending};

use axum::response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse, Response,
};
use futures_util::{stream, Stream, StreamExt};
use gqlws_executor::{
    DynExecutor, ExecutionResult, GraphQlError, GraphQlRequest, OperationContext,
    ResponseStream,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::{config::ProtocolConfig, timers::keep_alive_period};

/// Operation id reported to the executor for SSE requests.
pub const SSE_OPERATION_ID: &str = "sse";

/// One item of an SSE operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SseItem {
    Next(ExecutionResult),
    Error(Vec<GraphQlError>),
    Complete,
}

impl SseItem {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SseItem::Next(_))
    }

    pub fn into_event(self) -> Event {
        match self {
            SseItem::Next(result) => json_event("next", &result),
            SseItem::Error(errors) => json_event("error", &errors),
            SseItem::Complete => Event::default().event("complete").data(""),
        }
    }
}

fn json_event<T: Serialize>(name: &str, value: &T) -> Event {
    match Event::default().event(name).json_data(value) {
        Ok(event) => event,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("failed to encode SSE `{}` event: {}", name, _e);
            Event::default()
                .event("error")
                .data(r#"[{"message":"Failed to encode result"}]"#)
        }
    }
}

enum Progress {
    Pending(DynExecutor, GraphQlRequest, OperationContext),
    Running(ResponseStream),
    Done,
}

/// Run `request` and yield its results, ending with exactly one terminal
/// item.
pub fn operation_stream(
    executor: DynExecutor,
    request: GraphQlRequest,
    ctx: OperationContext,
) -> impl Stream<Item = SseItem> + Send + 'static {
    stream::unfold(
        Progress::Pending(executor, request, ctx),
        |progress| async move {
            match progress {
                Progress::Pending(executor, request, ctx) => {
                    match executor.execute(request, ctx).await {
                        Ok(result) => next_item(result.into_stream()).await,
                        Err(errors) => Some((SseItem::Error(errors), Progress::Done)),
                    }
                }
                Progress::Running(stream) => next_item(stream).await,
                Progress::Done => None,
            }
        },
    )
}

async fn next_item(mut stream: ResponseStream) -> Option<(SseItem, Progress)> {
    let item = match stream.next().await {
        Some(Ok(result)) => return Some((SseItem::Next(result), Progress::Running(stream))),
        Some(Err(errors)) => SseItem::Error(errors),
        None => SseItem::Complete,
    };
    Some((item, Progress::Done))
}

/// Build the SSE response body for one operation.
///
/// The body ends early once `shutdown` turns `true`.
pub(crate) fn sse_response(
    executor: DynExecutor,
    request: GraphQlRequest,
    ctx: OperationContext,
    config: &ProtocolConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Response {
    let stopping = async move {
        if shutdown.wait_for(|stopping| *stopping).await.is_err() {
            pending::<()>().await;
        }
    };
    let events = operation_stream(executor, request, ctx)
        .take_until(stopping)
        .map(|item| Ok::<_, Infallible>(item.into_event()));

    let sse = Sse::new(events);
    match keep_alive_period(config.keep_alive) {
        Some(interval) => sse
            .keep_alive(
                KeepAlive::new()
                    .interval(interval)
                    .event(Event::default().event("ping")),
            )
            .into_response(),
        None => sse.into_response(),
    }
}
