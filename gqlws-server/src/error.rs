//! Error types for the connection engine and the server.

use std::net::SocketAddr;

use gqlws_protocol::{CloseCode, DecodeError};
use thiserror::Error;

/// A fatal protocol condition. Each one closes the connection.
///
/// The `Display` output is the close reason sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Malformed frame, unknown type or missing required field
    #[error("Invalid message")]
    InvalidMessage,

    /// Operation message before the handshake completed
    #[error("Unauthorized")]
    Unauthorized,

    /// `connection_init` rejected by the init handler
    #[error("Forbidden")]
    Forbidden,

    /// No `connection_init` within the configured timeout
    #[error("Connection initialisation timeout")]
    InitTimeout,

    /// `subscribe` reused an id that is still live
    #[error("Subscriber for {id} already exists")]
    SubscriberAlreadyExists { id: String },

    /// Second `connection_init` on the same connection
    #[error("Too many initialisation requests")]
    TooManyInitRequests,

    /// Outbound buffer exceeded under [`crate::OverflowPolicy::Close`]
    #[error("Outbound buffer overflow")]
    OutboundOverflow,
}

impl ProtocolViolation {
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidMessage => CloseCode::InvalidMessage,
            Self::Unauthorized => CloseCode::Unauthorized,
            Self::Forbidden => CloseCode::Forbidden,
            Self::InitTimeout => CloseCode::ConnectionInitialisationTimeout,
            Self::SubscriberAlreadyExists { .. } => CloseCode::SubscriberAlreadyExists,
            Self::TooManyInitRequests => CloseCode::TooManyInitialisationRequests,
            Self::OutboundOverflow => CloseCode::InternalServerError,
        }
    }

    /// Returns whether the client may retry on a fresh connection
    pub fn is_retryable(&self) -> bool {
        self.close_code().is_retryable()
    }
}

impl From<DecodeError> for ProtocolViolation {
    fn from(_: DecodeError) -> Self {
        ProtocolViolation::InvalidMessage
    }
}

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },

    #[error("server task failed: {message}")]
    Serve { message: String },
}

pub type ServerResult<T> = Result<T, ServerError>;
