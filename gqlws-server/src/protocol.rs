//! Wire protocol types of the `graphql-transport-ws` subprotocol.
//!
//! Re-exported from [`gqlws_protocol`], the shared `no_std` crate that both
//! this server and native clients use.
//!
//! # Client → Server messages
//!
//! - `connection_init` - handshake, must come first
//! - `subscribe` - start an operation under a client-chosen id
//! - `complete` - stop an operation
//! - `ping` / `pong` - keep-alive
//!
//! # Server → Client messages
//!
//! - `connection_ack` - handshake accepted
//! - `next` - one result of an operation
//! - `error` - terminal failure of an operation
//! - `complete` - terminal completion of an operation
//! - `ping` / `pong` - keep-alive

pub use gqlws_protocol::{
    decode, encode, ClientMessage, CloseCode, DecodeError, EncodeError, ExecutionResult,
    GraphQlError, GraphQlRequest, JsonObject, Location, PathSegment, ServerMessage, SUBPROTOCOL,
};
