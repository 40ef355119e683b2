//! # mongotap-protocol
//!
//! MongoDB wire protocol codec for mongotap.
//!
//! This crate provides:
//! - Decoding of client requests for every legacy opcode plus OP_MSG
//! - Normalization of commands tunneled through OP_QUERY and OP_MSG into
//!   typed requests
//! - Reply emission in the OP_REPLY and OP_MSG envelopes
//! - Wire-level error codes and the server error type surfaced to clients

mod command;

pub mod decode;
pub mod encode;
pub mod error;
pub mod request;
pub mod response;
pub mod wire;

pub use decode::decode;
pub use encode::encode_response;
pub use error::{CommandError, ErrorCode, ProtocolError};
pub use request::{NamespacedCollection, ReplyFormat, Request, RequestType, RpcHeader};
pub use response::{Response, ResponseFlags};

/// Size of the standard RPC header in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum size of a single wire message, header included.
pub const MAX_MESSAGE_SIZE: i32 = 48_000_000;

/// Maximum size of a single BSON document accepted by the emulated server.
pub const MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;

/// Default port mongotap listens on.
pub const DEFAULT_PORT: u16 = 37017;

/// Opcode of OP_REPLY messages (reply only, never decoded as a request).
pub const OP_REPLY: i32 = 1;
/// Opcode of OP_UPDATE messages.
pub const OP_UPDATE: i32 = 2001;
/// Opcode of OP_INSERT messages.
pub const OP_INSERT: i32 = 2002;
/// Opcode of OP_QUERY messages.
pub const OP_QUERY: i32 = 2004;
/// Opcode of OP_GET_MORE messages.
pub const OP_GET_MORE: i32 = 2005;
/// Opcode of OP_DELETE messages.
pub const OP_DELETE: i32 = 2006;
/// Opcode of OP_KILL_CURSORS messages.
pub const OP_KILL_CURSORS: i32 = 2007;
/// Opcode of OP_MSG messages.
pub const OP_MSG: i32 = 2013;
