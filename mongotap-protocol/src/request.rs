//! Typed client requests decoded off the wire.

use bson::Document;
use std::fmt;
use std::str::FromStr;

/// The semantic type of a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Update,
    Insert,
    GetMore,
    Delete,
    KillCursors,
    Query,
    Command,
    FindAndUpdate,
    FindAndDelete,
    Unknown,
}

impl RequestType {
    /// Returns the stable string name used by the analyzer's filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Update => "update",
            RequestType::Insert => "insert",
            RequestType::GetMore => "getMore",
            RequestType::Delete => "delete",
            RequestType::KillCursors => "killCursors",
            RequestType::Query => "query",
            RequestType::Command => "command",
            RequestType::FindAndUpdate => "findAndUpdate",
            RequestType::FindAndDelete => "findAndDelete",
            RequestType::Unknown => "unknown",
        }
    }

    /// Returns a lexicographically sorted list of all request type names.
    pub fn all_names() -> Vec<&'static str> {
        let mut names = vec![
            RequestType::Update.as_str(),
            RequestType::Insert.as_str(),
            RequestType::GetMore.as_str(),
            RequestType::Delete.as_str(),
            RequestType::KillCursors.as_str(),
            RequestType::Query.as_str(),
            RequestType::Command.as_str(),
            RequestType::FindAndUpdate.as_str(),
            RequestType::FindAndDelete.as_str(),
            RequestType::Unknown.as_str(),
        ];
        names.sort_unstable();
        names
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(RequestType::Update),
            "insert" => Ok(RequestType::Insert),
            "getMore" => Ok(RequestType::GetMore),
            "delete" => Ok(RequestType::Delete),
            "killCursors" => Ok(RequestType::KillCursors),
            "query" => Ok(RequestType::Query),
            "command" => Ok(RequestType::Command),
            "findAndUpdate" => Ok(RequestType::FindAndUpdate),
            "findAndDelete" => Ok(RequestType::FindAndDelete),
            "unknown" => Ok(RequestType::Unknown),
            other => Err(format!("unknown request type {:?}", other)),
        }
    }
}

/// The reply envelope a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    /// No reply is sent (OP_UPDATE / OP_INSERT / OP_DELETE / OP_KILL_CURSORS).
    #[default]
    None,
    /// Reply via an OP_REPLY message (opcode 1).
    OpReply,
    /// Reply via an OP_MSG message (opcode 2013).
    OpMsg,
}

impl ReplyFormat {
    /// Opcode of the reply envelope, if one is sent at all.
    pub fn opcode(&self) -> Option<i32> {
        match self {
            ReplyFormat::None => None,
            ReplyFormat::OpReply => Some(crate::OP_REPLY),
            ReplyFormat::OpMsg => Some(crate::OP_MSG),
        }
    }
}

/// The standard header carried by every request and reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpcHeader {
    /// Total message size in bytes, header included.
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub opcode: i32,
}

impl RpcHeader {
    /// Size of the payload following the header.
    pub fn payload_length(&self) -> i32 {
        self.message_length - crate::HEADER_LEN as i32
    }
}

/// The shared portion of every decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInfo {
    pub header: RpcHeader,
    pub request_type: RequestType,
    pub reply_format: ReplyFormat,
}

/// A `database.collection` pair identifying a target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespacedCollection {
    pub database: String,
    pub collection: String,
}

impl NamespacedCollection {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for NamespacedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Flags accepted on update operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    /// Insert the supplied object when no document matches the selector.
    pub const UPSERT: u32 = 1 << 0;
    /// Update every matching document instead of just the first.
    pub const MULTI: u32 = 1 << 1;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with_upsert(mut self) -> Self {
        self.0 |= Self::UPSERT;
        self
    }

    pub fn with_multi(mut self) -> Self {
        self.0 |= Self::MULTI;
        self
    }

    pub fn is_upsert(&self) -> bool {
        self.0 & Self::UPSERT != 0
    }

    pub fn is_multi(&self) -> bool {
        self.0 & Self::MULTI != 0
    }
}

/// Flags accepted on insert operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFlags(u32);

impl InsertFlags {
    /// Keep processing a bulk insert after an individual failure.
    pub const CONTINUE_ON_ERROR: u32 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn with_continue_on_error(mut self) -> Self {
        self.0 |= Self::CONTINUE_ON_ERROR;
        self
    }

    pub fn continues_on_error(&self) -> bool {
        self.0 & Self::CONTINUE_ON_ERROR != 0
    }
}

/// Flags accepted on query operations. Bit 0 is reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags(u32);

impl QueryFlags {
    /// Leave the cursor open after the last batch is consumed.
    pub const TAILABLE_CURSOR: u32 = 1 << 1;
    /// Allow reads from replica secondaries.
    pub const SLAVE_OK: u32 = 1 << 2;
    /// Internal replication use only.
    pub const OPLOG_REPLAY: u32 = 1 << 3;
    /// Never time out the cursor due to inactivity.
    pub const NO_CURSOR_TIMEOUT: u32 = 1 << 4;
    /// With a tailable cursor, block briefly at the end of data.
    pub const AWAIT_DATA: u32 = 1 << 5;
    /// Stream all results down in multiple reply packages.
    pub const EXHAUST: u32 = 1 << 6;
    /// Accept partial results when some shards are down.
    pub const PARTIAL: u32 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

/// A single update operation inside an update request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateTarget {
    pub selector: Document,
    pub update: Document,
    pub array_filters: Vec<Document>,
    pub flags: UpdateFlags,
}

/// A single delete operation inside a delete request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteTarget {
    pub selector: Document,
    /// 1 to delete only the first match, 0 to delete all matches.
    pub limit: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub updates: Vec<UpdateTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub flags: InsertFlags,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetMoreRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub num_to_return: i32,
    pub cursor_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub deletes: Vec<DeleteTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KillCursorsRequest {
    pub info: RequestInfo,
    pub cursor_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub flags: QueryFlags,
    pub num_to_skip: i32,
    pub num_to_return: i32,
    pub query: Document,
    pub sort: Document,
    pub field_selector: Document,
}

/// Arguments of a findAndModify command that updates the matched document
/// and returns either the original or the modified version.
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndUpdateRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    /// Query matching the document to update.
    pub query: Document,
    /// Optional sort order when multiple documents match; only the first
    /// match is affected.
    pub sort: Document,
    pub update: Document,
    pub array_filters: Vec<Document>,
    /// Create the document if missing.
    pub upsert: bool,
    /// Return the updated document instead of the original.
    pub return_updated: bool,
    /// Optional selector for the fields of the returned document.
    pub field_selector: Document,
}

/// Arguments of a findAndModify command issued with `remove: true`. Deletes
/// the matched document and returns it to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndDeleteRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub query: Document,
    pub sort: Document,
    pub field_selector: Document,
}

/// A mongo command with no dedicated decoder; carries the command name and
/// its remaining arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub info: RequestInfo,
    pub collection: NamespacedCollection,
    pub command: String,
    pub args: Document,
}

/// A request whose opcode the decoder does not recognize. The payload is
/// preserved verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRequest {
    pub info: RequestInfo,
    pub payload: Vec<u8>,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Update(UpdateRequest),
    Insert(InsertRequest),
    GetMore(GetMoreRequest),
    Delete(DeleteRequest),
    KillCursors(KillCursorsRequest),
    Query(QueryRequest),
    Command(CommandRequest),
    FindAndUpdate(FindAndUpdateRequest),
    FindAndDelete(FindAndDeleteRequest),
    Unknown(UnknownRequest),
}

impl Request {
    /// The shared header/type/envelope portion of the request.
    pub fn info(&self) -> &RequestInfo {
        match self {
            Request::Update(r) => &r.info,
            Request::Insert(r) => &r.info,
            Request::GetMore(r) => &r.info,
            Request::Delete(r) => &r.info,
            Request::KillCursors(r) => &r.info,
            Request::Query(r) => &r.info,
            Request::Command(r) => &r.info,
            Request::FindAndUpdate(r) => &r.info,
            Request::FindAndDelete(r) => &r.info,
            Request::Unknown(r) => &r.info,
        }
    }

    pub fn header(&self) -> RpcHeader {
        self.info().header
    }

    pub fn opcode(&self) -> i32 {
        self.info().header.opcode
    }

    pub fn request_id(&self) -> i32 {
        self.info().header.request_id
    }

    pub fn request_type(&self) -> RequestType {
        self.info().request_type
    }

    pub fn reply_format(&self) -> ReplyFormat {
        self.info().reply_format
    }
}
