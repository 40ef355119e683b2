//! Reply payloads written back to clients.

use bson::Document;

/// Flags carried in the header of OP_REPLY messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseFlags(u32);

impl ResponseFlags {
    /// Set when a getMore names a cursor id unknown to the server.
    pub const CURSOR_NOT_FOUND: u32 = 1 << 0;
    /// Set when a query failed; the reply carries a single document with
    /// error details.
    pub const QUERY_ERROR: u32 = 1 << 1;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with_cursor_not_found(mut self) -> Self {
        self.0 |= Self::CURSOR_NOT_FOUND;
        self
    }

    pub fn with_query_error(mut self) -> Self {
        self.0 |= Self::QUERY_ERROR;
        self
    }

    pub fn cursor_not_found(&self) -> bool {
        self.0 & Self::CURSOR_NOT_FOUND != 0
    }

    pub fn query_error(&self) -> bool {
        self.0 & Self::QUERY_ERROR != 0
    }
}

/// A response to a client request, independent of the envelope it will be
/// serialized into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub flags: ResponseFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Response {
    /// A response carrying a single document and no cursor state.
    pub fn with_document(doc: Document) -> Self {
        Self {
            documents: vec![doc],
            ..Default::default()
        }
    }
}
