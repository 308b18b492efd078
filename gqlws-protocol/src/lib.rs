//! # gqlws-protocol
//!
//! Wire types and codec for the `graphql-transport-ws` subprotocol
//! (GraphQL over WebSocket).
//!
//! This crate is `no_std + alloc` compatible so the same definitions can be
//! used by the server engine (`gqlws-server`), by executor adapters
//! (`gqlws-executor`) and by native or browser clients.
//!
//! # Wire Protocol
//!
//! All messages are JSON text frames with a `"type"` discriminant tag.
//!
//! ## Client → Server ([`ClientMessage`])
//!
//! - `connection_init` — handshake, optional payload
//! - `subscribe` — start an operation under a client-chosen `id`
//! - `complete` — cancel the operation with the given `id`
//! - `ping` / `pong` — keepalive
//!
//! ## Server → Client ([`ServerMessage`])
//!
//! - `connection_ack` — handshake accepted
//! - `next` — one execution result for an operation
//! - `error` — terminal operation failure
//! - `complete` — terminal operation completion
//! - `ping` / `pong` — keepalive
//!
//! Protocol violations are not messages: the server closes the socket with
//! one of the [`CloseCode`]s.

#![no_std]

extern crate alloc;

use alloc::borrow::ToOwned;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// JSON object type used for `variables` and `extensions`.
pub type JsonObject = Map<String, Value>;

// ════════════════════════════════════════════════════════════════════
// GraphQL payloads
// ════════════════════════════════════════════════════════════════════

/// The payload of a `subscribe` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<JsonObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonObject>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: JsonObject) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// One GraphQL response, carried by a `next` message.
///
/// Field-level errors live in `errors` next to partial `data`; they never
/// terminate the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonObject>,
}

impl ExecutionResult {
    /// A result carrying only `data`.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// A result carrying only errors.
    pub fn errors(errors: Vec<GraphQlError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: GraphQlError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A GraphQL error as defined by the GraphQL response format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonObject>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.locations.push(Location { line, column });
        self
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Source location of a GraphQL error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// One segment of a GraphQL error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(u64),
    Field(String),
}

impl From<&str> for PathSegment {
    fn from(field: &str) -> Self {
        PathSegment::Field(field.to_owned())
    }
}

impl From<u64> for PathSegment {
    fn from(index: u64) -> Self {
        PathSegment::Index(index)
    }
}

// ════════════════════════════════════════════════════════════════════
// Client → Server
// ════════════════════════════════════════════════════════════════════

/// A message received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake. Must be the first message on a connection.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Start an operation under the client-chosen `id`.
    Subscribe { id: String, payload: GraphQlRequest },

    /// Stop the operation with the given `id`.
    Complete { id: String },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl ClientMessage {
    const TYPES: &'static [&'static str] =
        &["connection_init", "subscribe", "complete", "ping", "pong"];

    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ConnectionInit { .. } => "connection_init",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Complete { .. } => "complete",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Pong { .. } => "pong",
        }
    }

    pub fn encode(&self) -> Result<String, EncodeError> {
        encode_json(self)
    }
}

// ════════════════════════════════════════════════════════════════════
// Server → Client
// ════════════════════════════════════════════════════════════════════

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// One result for the operation `id`.
    Next { id: String, payload: ExecutionResult },

    /// Terminal failure of the operation `id`.
    Error {
        id: String,
        payload: Vec<GraphQlError>,
    },

    /// Terminal completion of the operation `id`.
    Complete { id: String },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl ServerMessage {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionAck { .. } => "connection_ack",
            ServerMessage::Next { .. } => "next",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Complete { .. } => "complete",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    /// The operation id this message is correlated with, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            ServerMessage::Next { id, .. }
            | ServerMessage::Error { id, .. }
            | ServerMessage::Complete { id } => Some(id),
            _ => None,
        }
    }

    /// Returns `true` for `error` and `complete`, after which the id is free.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::Error { .. } | ServerMessage::Complete { .. }
        )
    }

    pub fn encode(&self) -> Result<String, EncodeError> {
        encode_json(self)
    }

    /// Parse a server frame (client side).
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::Invalid {
            kind: "server message".to_string(),
            reason: e.to_string(),
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// Close codes
// ════════════════════════════════════════════════════════════════════

/// WebSocket close codes used by the subprotocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    NormalClosure = 1000,
    InvalidMessage = 4400,
    Unauthorized = 4401,
    Forbidden = 4403,
    ConnectionInitialisationTimeout = 4408,
    SubscriberAlreadyExists = 4409,
    TooManyInitialisationRequests = 4429,
    InternalServerError = 4500,
}

impl CloseCode {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            1000 => CloseCode::NormalClosure,
            4400 => CloseCode::InvalidMessage,
            4401 => CloseCode::Unauthorized,
            4403 => CloseCode::Forbidden,
            4408 => CloseCode::ConnectionInitialisationTimeout,
            4409 => CloseCode::SubscriberAlreadyExists,
            4429 => CloseCode::TooManyInitialisationRequests,
            4500 => CloseCode::InternalServerError,
            _ => return None,
        })
    }

    /// Whether a client may reconnect and retry after this close.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            CloseCode::ConnectionInitialisationTimeout
                | CloseCode::TooManyInitialisationRequests
                | CloseCode::InternalServerError
        )
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        code.as_u16()
    }
}

// ════════════════════════════════════════════════════════════════════
// Codec
// ════════════════════════════════════════════════════════════════════

/// Reasons an inbound frame is not a valid client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {reason}")]
    NotJson { reason: String },

    #[error("message has no string `type` field")]
    MissingType,

    #[error("unknown message type `{kind}`")]
    UnknownType { kind: String },

    #[error("invalid `{kind}` message: {reason}")]
    Invalid { kind: String, reason: String },
}

/// Failure to serialize an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to encode message: {reason}")]
pub struct EncodeError {
    pub reason: String,
}

/// Decode one inbound text frame into a [`ClientMessage`].
///
/// The `type` tag is checked against the client message set before the
/// variant's required fields are validated, so a `next` sent by a client is
/// reported as [`DecodeError::UnknownType`] rather than a shape error.
pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::NotJson {
        reason: e.to_string(),
    })?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_owned(),
        None => return Err(DecodeError::MissingType),
    };

    if !ClientMessage::TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType { kind });
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Invalid {
        kind,
        reason: e.to_string(),
    })
}

/// Encode one outbound [`ServerMessage`] into a text frame.
pub fn encode(message: &ServerMessage) -> Result<String, EncodeError> {
    message.encode()
}

fn encode_json<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError {
        reason: e.to_string(),
    })
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
