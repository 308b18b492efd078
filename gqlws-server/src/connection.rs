//! The `graphql-transport-ws` connection state machine.
//!
//! A [`Connection`] is transport agnostic: it consumes decoded text frames
//! from any `Stream<Item = String>` and writes through a [`Multiplexer`].
//! The Axum session glue in `session.rs` is one such transport; the
//! integration tests drive it over plain channels.
//!
//! ```text
//!  Uninitialized ──open──▶ Initializing ──connection_init──▶ Active
//!                              │                               │
//!                              └──── violation / close ───────▶ Closed
//! ```
//!
//! One reader (the [`Connection::run`] loop) processes inbound frames
//! sequentially. Each accepted `subscribe` spawns a producer task that drives
//! the executor's result stream into the multiplexer. Producers and reader
//! share only the [`SubscriptionRegistry`].

use std::{future::pending, sync::Arc};

use futures_util::{Stream, StreamExt};
use gqlws_executor::{DynExecutor, OperationContext};
use gqlws_protocol::{
    decode, ClientMessage, CloseCode, GraphQlError, GraphQlRequest, ServerMessage,
};
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    config::ProtocolConfig,
    error::ProtocolViolation,
    init::{ConnectionInfo, DynInitHandler},
    multiplexer::{MuxError, Multiplexer},
    registry::{RegistryError, Subscription, SubscriptionRegistry},
    timers::{InitTimer, KeepAlive},
};

/// Close reason sent to every client when the server shuts down.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

// ════════════════════════════════════════════════════════════════════
// State & outcome
// ════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Active,
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The inbound stream ended (client close or disconnect)
    ClientClosed,
    /// The writer went away (write failure)
    TransportFailed,
    /// The server shut down
    Shutdown,
    /// The server closed the connection with a protocol close code
    Violation(ProtocolViolation),
}

impl Disconnect {
    /// Close code and reason the server sends for this outcome, if any.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        match self {
            Disconnect::Violation(violation) => {
                Some((violation.close_code().as_u16(), violation.to_string()))
            }
            Disconnect::Shutdown => Some((
                CloseCode::NormalClosure.as_u16(),
                SHUTDOWN_REASON.to_string(),
            )),
            Disconnect::ClientClosed | Disconnect::TransportFailed => None,
        }
    }
}

impl From<ProtocolViolation> for Disconnect {
    fn from(violation: ProtocolViolation) -> Self {
        Disconnect::Violation(violation)
    }
}

// ════════════════════════════════════════════════════════════════════
// Connection
// ════════════════════════════════════════════════════════════════════

pub struct Connection {
    info: ConnectionInfo,
    state: ConnectionState,
    executor: DynExecutor,
    init_handler: DynInitHandler,
    mux: Multiplexer,
    registry: SubscriptionRegistry,
    init_timer: InitTimer,
    keep_alive: KeepAlive,
    init_payload: Option<Arc<Value>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Connection {
    pub fn new(
        info: ConnectionInfo,
        executor: DynExecutor,
        init_handler: DynInitHandler,
        config: &ProtocolConfig,
        mux: Multiplexer,
    ) -> Self {
        Self {
            info,
            state: ConnectionState::Uninitialized,
            executor,
            init_handler,
            mux,
            registry: SubscriptionRegistry::new(),
            init_timer: InitTimer::new(config.init_timeout),
            keep_alive: KeepAlive::new(config.keep_alive),
            init_payload: None,
            shutdown: None,
        }
    }

    /// Use a registry shared with the connection tracker.
    pub fn with_registry(mut self, registry: SubscriptionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Close the connection once the watched flag turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Drive the connection until it closes.
    ///
    /// `inbound` yields the text frames of the transport and ends when the
    /// transport closes. On return every live operation has been cancelled
    /// and, for server-initiated closes, the close frame has been queued.
    pub async fn run<S>(&mut self, mut inbound: S) -> Disconnect
    where
        S: Stream<Item = String> + Unpin,
    {
        if self.state != ConnectionState::Uninitialized {
            return Disconnect::ClientClosed;
        }

        self.init_timer.arm();
        self.state = ConnectionState::Initializing;

        #[cfg(feature = "tracing")]
        tracing::debug!("{}: awaiting connection_init", self.info.id);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.mux.overflowed() => {
                    break ProtocolViolation::OutboundOverflow.into();
                }
                _ = self.init_timer.expired() => {
                    break ProtocolViolation::InitTimeout.into();
                }
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    break Disconnect::Shutdown;
                }
                _ = self.mux.closed() => {
                    break Disconnect::TransportFailed;
                }
                _ = self.keep_alive.tick() => {
                    if let Err(outcome) = self.send_control(ServerMessage::Ping { payload: None }).await {
                        break outcome;
                    }
                }
                frame = inbound.next() => {
                    let Some(text) = frame else {
                        break Disconnect::ClientClosed;
                    };
                    if let Err(outcome) = self.handle_frame(&text).await {
                        break outcome;
                    }
                }
            }
        };

        self.teardown(&outcome);
        outcome
    }

    fn teardown(&mut self, outcome: &Disconnect) {
        if let Some((code, reason)) = outcome.close_frame() {
            self.mux.close(code, reason);
        }

        self.init_timer.cancel();
        self.keep_alive.disarm();
        let _cancelled = self.registry.cancel_all();
        self.state = ConnectionState::Closed;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "{}: closed ({:?}, {} operations cancelled)",
            self.info.id,
            outcome,
            _cancelled
        );
    }

    // ════════════════════════════════════════════════════════════════
    // Inbound routing
    // ════════════════════════════════════════════════════════════════

    async fn handle_frame(&mut self, text: &str) -> Result<(), Disconnect> {
        let message = match decode(text) {
            Ok(message) => message,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("{}: invalid message: {}", self.info.id, _e);
                return Err(ProtocolViolation::InvalidMessage.into());
            }
        };

        match (self.state, message) {
            (ConnectionState::Initializing, ClientMessage::ConnectionInit { payload }) => {
                self.accept_init(payload).await
            }
            (ConnectionState::Active, ClientMessage::ConnectionInit { .. }) => {
                Err(ProtocolViolation::TooManyInitRequests.into())
            }
            (ConnectionState::Active, ClientMessage::Subscribe { id, payload }) => {
                self.start_operation(id, payload)
            }
            (ConnectionState::Active, ClientMessage::Complete { id }) => {
                if self.registry.remove(&id) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("{}: operation {} cancelled by client", self.info.id, id);
                }
                Ok(())
            }
            (ConnectionState::Active, ClientMessage::Ping { payload }) => {
                self.send_control(ServerMessage::Pong { payload }).await
            }
            (ConnectionState::Active, ClientMessage::Pong { .. }) => Ok(()),
            (_, _message) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "{}: `{}` before connection_ack",
                    self.info.id,
                    _message.kind()
                );
                Err(ProtocolViolation::Unauthorized.into())
            }
        }
    }

    async fn accept_init(&mut self, payload: Option<Value>) -> Result<(), Disconnect> {
        self.init_timer.cancel();

        let ack = match self
            .init_handler
            .on_connect(&self.info, payload.as_ref())
            .await
        {
            Ok(ack) => ack,
            Err(_rejected) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "{}: connection_init rejected: {}",
                    self.info.id,
                    _rejected.message
                );
                return Err(ProtocolViolation::Forbidden.into());
            }
        };

        self.init_payload = payload.map(Arc::new);
        self.state = ConnectionState::Active;
        self.keep_alive.arm();

        #[cfg(feature = "tracing")]
        tracing::debug!("{}: connection acknowledged", self.info.id);

        self.send_control(ServerMessage::ConnectionAck { payload: ack })
            .await
    }

    fn start_operation(&mut self, id: String, request: GraphQlRequest) -> Result<(), Disconnect> {
        let subscription = match self.registry.create(&id) {
            Ok(subscription) => subscription,
            Err(RegistryError::DuplicateId { id }) => {
                return Err(ProtocolViolation::SubscriberAlreadyExists { id }.into());
            }
            Err(RegistryError::Closed) => return Err(Disconnect::TransportFailed),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("{}: operation {} started", self.info.id, id);

        let ctx = OperationContext::new(self.info.id, id)
            .with_init_payload(self.init_payload.clone());
        let producer = Producer {
            subscription,
            executor: self.executor.clone(),
            mux: self.mux.clone(),
            registry: self.registry.clone(),
        };
        tokio::spawn(producer.run(request, ctx));
        Ok(())
    }

    /// Send a reader-originated message (ack, pong, ping).
    async fn send_control(&self, message: ServerMessage) -> Result<(), Disconnect> {
        match self.mux.send(&message).await {
            Ok(()) => Ok(()),
            Err(MuxError::Overflow) => Err(ProtocolViolation::OutboundOverflow.into()),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("{}: failed to send {}: {}", self.info.id, message.kind(), _e);
                Err(Disconnect::TransportFailed)
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stopping| *stopping).await.is_ok() {
            return;
        }
    }
    // No shutdown source, or it was dropped without firing.
    pending().await
}

// ════════════════════════════════════════════════════════════════════
// Producer task
// ════════════════════════════════════════════════════════════════════

/// How a producer's result stream ended.
enum Outcome {
    Completed,
    Failed(Vec<GraphQlError>),
    /// The multiplexer refused a frame; the connection is going down.
    Aborted(MuxError),
}

struct Producer {
    subscription: Subscription,
    executor: DynExecutor,
    mux: Multiplexer,
    registry: SubscriptionRegistry,
}

impl Producer {
    async fn run(self, request: GraphQlRequest, ctx: OperationContext) {
        let Producer {
            mut subscription,
            executor,
            mux,
            registry,
        } = self;
        let id = subscription.id().to_string();

        // Dropping `drive` drops the pending execute future or the stream.
        let outcome = tokio::select! {
            biased;
            _ = subscription.cancelled() => None,
            outcome = drive(&executor, request, ctx, &mux, &id) => Some(outcome),
        };

        let terminal = match outcome {
            None => return,
            Some(Outcome::Aborted(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("operation {} aborted: {}", id, _e);
                registry.release(&subscription);
                return;
            }
            Some(Outcome::Completed) => ServerMessage::Complete { id },
            Some(Outcome::Failed(errors)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("operation {} failed with {} errors", id, errors.len());
                ServerMessage::Error {
                    id,
                    payload: errors,
                }
            }
        };

        // The id becomes reusable before the client can see the terminal
        // message. A client `complete` that won the race suppresses it.
        if registry.release(&subscription) {
            if let Err(_e) = mux.send(&terminal).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "operation {} lost its {}: {}",
                    subscription.id(),
                    terminal.kind(),
                    _e
                );
            }
        }
    }
}

async fn drive(
    executor: &DynExecutor,
    request: GraphQlRequest,
    ctx: OperationContext,
    mux: &Multiplexer,
    id: &str,
) -> Outcome {
    let mut stream = match executor.execute(request, ctx).await {
        Ok(result) => result.into_stream(),
        Err(errors) => return Outcome::Failed(errors),
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(payload) => {
                let next = ServerMessage::Next {
                    id: id.to_string(),
                    payload,
                };
                if let Err(e) = mux.send(&next).await {
                    return Outcome::Aborted(e);
                }
            }
            Err(errors) => return Outcome::Failed(errors),
        }
    }

    Outcome::Completed
}
