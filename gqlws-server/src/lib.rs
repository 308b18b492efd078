//! # gqlws-server
//!
//! `graphql-transport-ws` (GraphQL over WebSocket) connection engine with an
//! Axum server around it.
//!
//! Many concurrent GraphQL operations, identified by client-chosen ids, are
//! multiplexed over one WebSocket. The engine enforces the handshake and its
//! timeout, routes `subscribe` / `complete`, serializes every operation's
//! results onto the socket and closes with the protocol's close codes on
//! violations. GraphQL execution itself is delegated to an
//! [`Executor`](gqlws_executor::Executor).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gqlws_server::GraphQlWsServer;
//!
//! let handle = GraphQlWsServer::new(MyExecutor)
//!     .bind("0.0.0.0:4000")
//!     .path("/graphql")
//!     .with_init_timeout(Some(Duration::from_secs(10)))
//!     .start()
//!     .await?;
//! ```
//!
//! ## Layers
//!
//! - [`connection`] - the transport-agnostic state machine
//! - [`registry`] - live operations of one connection
//! - [`multiplexer`] - the bounded outbound queue shared by all producers
//! - [`timers`] - init timeout and keep-alive
//! - [`builder`] - Axum glue: WebSocket upgrade, [`sse`] endpoint and
//!   `/health`
//!
//! ## Connection init
//!
//! See [`init`] for the [`ConnectionInitHandler`] hook.

pub mod builder;
pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod error;
pub mod init;
pub mod multiplexer;
pub mod protocol;
pub mod registry;
pub(crate) mod server;
pub(crate) mod session;
pub mod sse;
pub mod timers;

// ════════════════════════════════════════════════════════════════════
// Public re-exports
// ════════════════════════════════════════════════════════════════════

/// The primary entry point for the server.
///
/// This is a type alias for [`builder::GraphQlWsServerBuilder`].
pub type GraphQlWsServer = builder::GraphQlWsServerBuilder;

pub use builder::{GraphQlWsServerBuilder, ServerHandle};
pub use config::{OverflowPolicy, ProtocolConfig};
pub use connection::{Connection, ConnectionState, Disconnect};
pub use connection_manager::ConnectionManager;
pub use error::{ProtocolViolation, ServerError, ServerResult};
pub use init::{AcceptAll, ConnectionInfo, ConnectionInitHandler, DynInitHandler, InitRejected};
pub use multiplexer::{CloseFrame, MuxError, Multiplexer, OutboundFrame, OutboundQueue};
pub use registry::{RegistryError, SubscriptionRegistry};

pub use gqlws_executor::{
    executor_fn, ConnectionId, DynExecutor, ExecuteResult, Executor, OperationContext,
    OperationResult, ResponseStream,
};
pub use protocol::{ClientMessage, CloseCode, ServerMessage};
