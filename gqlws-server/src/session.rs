//! Per-connection WebSocket session.
//!
//! Each upgraded socket is split into two cooperating halves:
//!
//! 1. **Send loop** - a spawned task draining the connection's
//!    [`OutboundQueue`] into the socket, ending after a close frame.
//! 2. **Reader** - the [`Connection`] state machine, run in place over the
//!    socket's text frames.
//!
//! When the reader returns, the send loop gets a bounded amount of time to
//! flush what is queued (including the close frame) before it is aborted and
//! the connection is unregistered.

use std::{future::ready, time::Duration};

use axum::extract::ws::{CloseFrame as WsCloseFrame, Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use gqlws_executor::{ConnectionId, DynExecutor};
use tokio::sync::watch;

use crate::{
    config::ProtocolConfig,
    connection::Connection,
    connection_manager::ConnectionManager,
    init::{ConnectionInfo, DynInitHandler},
    multiplexer::{self, OutboundFrame, OutboundQueue},
};

/// Upper bound on flushing queued frames after the reader finished.
pub(crate) const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// ════════════════════════════════════════════════════════════════════
// Session context
// ════════════════════════════════════════════════════════════════════

/// Shared context injected into every session.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub executor: DynExecutor,
    pub init_handler: DynInitHandler,
    pub config: ProtocolConfig,
    pub connections: ConnectionManager,
    pub shutdown: watch::Receiver<bool>,
}

// ════════════════════════════════════════════════════════════════════
// Session entry point
// ════════════════════════════════════════════════════════════════════

/// Drive a single WebSocket connection to completion.
///
/// This function runs inside the task Axum spawns for the upgrade.
pub(crate) async fn run_session(socket: WebSocket, info: ConnectionInfo, ctx: SessionContext) {
    let id = info.id;
    let registry = ctx.connections.register(info.clone());

    #[cfg(feature = "tracing")]
    tracing::debug!("{}: session started", id);

    let (mux, outbound) =
        multiplexer::channel(ctx.config.outbound_capacity, ctx.config.overflow_policy);
    let (ws_sender, ws_receiver) = socket.split();
    let mut send_handle = tokio::spawn(send_loop(ws_sender, outbound, id));

    // Text frames until the peer closes or the socket fails.
    let inbound = ws_receiver
        .take_while(|frame| ready(matches!(frame, Ok(msg) if !matches!(msg, Message::Close(_)))))
        .filter_map(|frame| {
            ready(match frame {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                _ => None,
            })
        });
    let inbound = std::pin::pin!(inbound);

    let mut connection = Connection::new(
        info,
        ctx.executor.clone(),
        ctx.init_handler.clone(),
        &ctx.config,
        mux,
    )
    .with_registry(registry)
    .with_shutdown(ctx.shutdown.clone());

    let _outcome = connection.run(inbound).await;
    // Release our multiplexer so the send loop ends once producers stop.
    drop(connection);

    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_handle)
        .await
        .is_err()
    {
        #[cfg(feature = "tracing")]
        tracing::warn!("{}: flush timed out, dropping socket", id);
        send_handle.abort();
    }

    ctx.connections.unregister(id);

    #[cfg(feature = "tracing")]
    tracing::debug!("{}: session ended ({:?})", id, _outcome);
}

// ════════════════════════════════════════════════════════════════════
// Send loop
// ════════════════════════════════════════════════════════════════════

async fn send_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: OutboundQueue,
    #[allow(unused_variables)] id: ConnectionId,
) {
    while let Some(frame) = outbound.recv().await {
        let (msg, last) = match frame {
            OutboundFrame::Text(text) => (Message::Text(text.into()), false),
            OutboundFrame::Close(close) => (
                Message::Close(Some(WsCloseFrame {
                    code: close.code,
                    reason: close.reason.into(),
                })),
                true,
            ),
        };

        if let Err(_e) = ws_sender.send(msg).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("{}: send failed: {}", id, _e);
            return;
        }
        if last {
            break;
        }
    }

    let _ = ws_sender.close().await;
}
