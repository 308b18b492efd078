//! Connection initialisation hook.
//!
//! The [`ConnectionInitHandler`] trait is called once per connection when the
//! client's `connection_init` arrives. It can:
//!
//! 1. **Accept** the connection, optionally returning a payload that is sent
//!    back in `connection_ack`.
//! 2. **Reject** the connection, which closes it with `4403 Forbidden`.
//!
//! What the payload means (tokens, headers, tenant ids …) is up to the
//! application. The default implementation ([`AcceptAll`]) accepts every
//! connection and sends a bare `connection_ack`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use gqlws_executor::ConnectionId;
use serde_json::Value;

// ════════════════════════════════════════════════════════════════════
// Public types
// ════════════════════════════════════════════════════════════════════

/// Information about a connection, passed to the init hook.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Peer address, when the transport has one.
    pub remote_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// Returned by [`ConnectionInitHandler::on_connect`] to refuse a connection.
#[derive(Debug, Clone)]
pub struct InitRejected {
    pub message: String,
}

impl InitRejected {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// ConnectionInitHandler trait
// ════════════════════════════════════════════════════════════════════

/// Pluggable `connection_init` hook.
///
/// # Example — shared secret in the init payload
///
/// ```rust,ignore
/// use gqlws_server::init::{ConnectionInfo, ConnectionInitHandler, InitRejected};
///
/// struct SharedSecret(String);
///
/// #[async_trait::async_trait]
/// impl ConnectionInitHandler for SharedSecret {
///     async fn on_connect(
///         &self,
///         _info: &ConnectionInfo,
///         payload: Option<&serde_json::Value>,
///     ) -> Result<Option<serde_json::Value>, InitRejected> {
///         let secret = payload
///             .and_then(|p| p.get("secret"))
///             .and_then(|s| s.as_str())
///             .ok_or_else(|| InitRejected::new("missing secret"))?;
///
///         if secret == self.0 {
///             Ok(None)
///         } else {
///             Err(InitRejected::new("wrong secret"))
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionInitHandler: Send + Sync + 'static {
    /// Return [`Ok(ack_payload)`] to acknowledge the connection or
    /// [`Err(InitRejected)`] to close it with `4403`.
    async fn on_connect(
        &self,
        info: &ConnectionInfo,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, InitRejected>;
}

// ════════════════════════════════════════════════════════════════════
// AcceptAll — default
// ════════════════════════════════════════════════════════════════════

/// Default handler that acknowledges every connection without a payload.
pub struct AcceptAll;

#[async_trait]
impl ConnectionInitHandler for AcceptAll {
    async fn on_connect(
        &self,
        _info: &ConnectionInfo,
        _payload: Option<&Value>,
    ) -> Result<Option<Value>, InitRejected> {
        Ok(None)
    }
}

/// Type-erased init handler stored inside the server.
pub type DynInitHandler = Arc<dyn ConnectionInitHandler>;
