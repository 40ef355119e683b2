//! Request decoding for every supported opcode.
//!
//! Legacy opcodes (OP_UPDATE, OP_INSERT, OP_GET_MORE, OP_DELETE,
//! OP_KILL_CURSORS) decode straight into their typed requests. OP_QUERY and
//! OP_MSG can tunnel commands; those are normalized through the command
//! sub-decoders so an `insert` arriving via either envelope yields the same
//! request type. Unrecognized opcodes never fail: they decode into
//! `Request::Unknown` with the payload preserved.
//!
//! See <https://www.mongodb.com/docs/manual/legacy-opcodes/> and the OP_MSG
//! specification for the message schemas.

use crate::command;
use crate::error::ProtocolError;
use crate::request::*;
use crate::wire::Reader;
use crate::HEADER_LEN;
use bson::{Bson, Document};

/// Decodes a full request frame, header included.
pub fn decode(frame: &[u8]) -> Result<Request, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader(frame.len()));
    }

    let mut r = Reader::new(frame);
    let header = decode_header(&mut r)?;

    match header.opcode {
        crate::OP_UPDATE => decode_update(header, &mut r),
        crate::OP_INSERT => decode_insert(header, &mut r),
        crate::OP_QUERY => decode_query(header, &mut r),
        crate::OP_GET_MORE => decode_get_more(header, &mut r),
        crate::OP_DELETE => decode_delete(header, &mut r),
        crate::OP_KILL_CURSORS => decode_kill_cursors(header, &mut r),
        crate::OP_MSG => decode_msg(header, &mut r),
        _ => decode_unknown(header, &mut r),
    }
}

fn decode_header(r: &mut Reader<'_>) -> Result<RpcHeader, ProtocolError> {
    Ok(RpcHeader {
        message_length: r.read_i32("message length")?,
        request_id: r.read_i32("request id")?,
        response_to: r.read_i32("response to")?,
        opcode: r.read_i32("opcode")?,
    })
}

fn info(header: RpcHeader, request_type: RequestType, reply_format: ReplyFormat) -> RequestInfo {
    RequestInfo {
        header,
        request_type,
        reply_format,
    }
}

/// OP_UPDATE:
///
/// ```text
/// int32     ZERO                reserved
/// cstring   fullCollectionName  "dbname.collectionname"
/// int32     flags
/// document  selector
/// document  update
/// ```
///
/// The server never replies to update requests.
fn decode_update(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    r.read_i32("update reserved field")?;
    let collection = r.read_namespace()?;
    let flags = UpdateFlags::from_bits(r.read_u32("update flags")?);
    let selector = r.read_document()?;
    let update = r.read_document()?;

    Ok(Request::Update(UpdateRequest {
        info: info(header, RequestType::Update, ReplyFormat::None),
        collection,
        updates: vec![UpdateTarget {
            selector,
            update,
            array_filters: Vec::new(),
            flags,
        }],
    }))
}

/// OP_INSERT:
///
/// ```text
/// int32     flags
/// cstring   fullCollectionName
/// document* documents           until the payload runs out
/// ```
///
/// The server never replies to insert requests.
fn decode_insert(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    let flags = InsertFlags::from_bits(r.read_u32("insert flags")?);
    let collection = r.read_namespace()?;

    // Read documents until the payload is exhausted. A document truncated at
    // the end of the payload is fatal.
    let mut documents = Vec::new();
    while !r.is_empty() {
        documents.push(r.read_document()?);
    }

    Ok(Request::Insert(InsertRequest {
        info: info(header, RequestType::Insert, ReplyFormat::None),
        collection,
        flags,
        documents,
    }))
}

/// OP_GET_MORE:
///
/// ```text
/// int32     ZERO
/// cstring   fullCollectionName
/// int32     numberToReturn
/// int64     cursorID
/// ```
///
/// The server always replies to getMore requests.
fn decode_get_more(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    r.read_i32("getMore reserved field")?;
    let collection = r.read_namespace()?;
    let num_to_return = r.read_i32("getMore number to return")?;
    let cursor_id = r.read_i64("getMore cursor id")?;

    Ok(Request::GetMore(GetMoreRequest {
        info: info(header, RequestType::GetMore, ReplyFormat::OpReply),
        collection,
        num_to_return,
        cursor_id,
    }))
}

/// OP_DELETE:
///
/// ```text
/// int32     ZERO
/// cstring   fullCollectionName
/// int32     flags               bit 0: delete only the first match
/// document  selector
/// ```
///
/// The server never replies to delete requests.
fn decode_delete(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    r.read_i32("delete reserved field")?;
    let collection = r.read_namespace()?;
    let flags = r.read_i32("delete flags")?;
    let limit = if flags & 0x1 == 0x1 { 1 } else { 0 };
    let selector = r.read_document()?;

    Ok(Request::Delete(DeleteRequest {
        info: info(header, RequestType::Delete, ReplyFormat::None),
        collection,
        deletes: vec![DeleteTarget { selector, limit }],
    }))
}

/// OP_KILL_CURSORS:
///
/// ```text
/// int32     ZERO
/// int32     numberOfCursorIDs
/// int64*    cursorIDs
/// ```
///
/// The server never replies to killCursors requests.
fn decode_kill_cursors(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    r.read_i32("killCursors reserved field")?;
    let count = r.read_i32("killCursors cursor count")?;

    let mut cursor_ids = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        cursor_ids.push(r.read_i64("killCursors cursor id")?);
    }

    Ok(Request::KillCursors(KillCursorsRequest {
        info: info(header, RequestType::KillCursors, ReplyFormat::None),
        cursor_ids,
    }))
}

/// OP_QUERY:
///
/// ```text
/// int32     flags
/// cstring   fullCollectionName
/// int32     numberToSkip
/// int32     numberToReturn
/// document  query
/// document? returnFieldsSelector
/// ```
///
/// A query against the pseudo-collection `$cmd` carries a command: the first
/// field of the query document names it, and the command sub-decoders
/// normalize it into a typed request with an OP_REPLY envelope.
fn decode_query(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    let flags = QueryFlags::from_bits(r.read_u32("query flags")?);
    let mut collection = r.read_namespace()?;
    let num_to_skip = r.read_i32("query number to skip")?;
    let num_to_return = r.read_i32("query number to return")?;
    let query = r.read_document()?;

    // The field selector is optional; hitting the end of the payload here
    // just means none was provided.
    let field_selector = if r.is_empty() {
        Document::new()
    } else {
        r.read_document()?
    };

    if collection.collection != "$cmd" {
        return Ok(Request::Query(QueryRequest {
            info: info(header, RequestType::Query, ReplyFormat::OpReply),
            collection,
            flags,
            num_to_skip,
            num_to_return,
            query,
            sort: Document::new(),
            field_selector,
        }));
    }

    // The query document is a command. Its first field names the command; a
    // string value doubles as the real target collection.
    let (name, args) = split_command(&query, "query")?;
    if let Some(Bson::String(target)) = query.get(&name) {
        collection.collection = target.clone();
    }

    command::decode_command(header, ReplyFormat::OpReply, collection, &name, args)
}

/// OP_MSG:
///
/// ```text
/// uint32     flagBits
/// section+   one body section (kind 0), at most one document
///            sequence section (kind 1)
/// [uint32]   optional CRC-32C when flagBits bit 0 is set
/// ```
///
/// The checksum is skipped, never verified.
fn decode_msg(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    let flag_bits = r.read_u32("OP_MSG flag bits")?;
    let checksum_len = if flag_bits & 0x1 == 0x1 { 4 } else { 0 };

    let mut body: Option<Document> = None;
    let mut sequence: Option<(String, Vec<Document>)> = None;

    while r.remaining() > checksum_len {
        match r.read_u8("section kind")? {
            0 => {
                if body.is_some() {
                    return Err(ProtocolError::MalformedMessage(
                        "more than one body section".to_string(),
                    ));
                }
                body = Some(r.read_document()?);
            }
            1 => {
                if sequence.is_some() {
                    return Err(ProtocolError::MalformedMessage(
                        "more than one document sequence section".to_string(),
                    ));
                }
                sequence = Some(decode_document_sequence(r)?);
            }
            kind => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "unsupported section kind {}",
                    kind
                )));
            }
        }
    }
    if checksum_len != 0 {
        r.read_bytes(checksum_len, "OP_MSG checksum")?;
    }

    let mut body = body.ok_or_else(|| {
        ProtocolError::MalformedMessage("missing body section".to_string())
    })?;

    let name = body
        .iter()
        .next()
        .map(|(key, _)| key.clone())
        .ok_or_else(|| ProtocolError::MalformedMessage("empty command document".to_string()))?;

    // A string-valued command argument names the target collection; the
    // optional $db field names the database.
    let collection = match body.get(&name) {
        Some(Bson::String(target)) => target.clone(),
        _ => "$cmd".to_string(),
    };
    body.remove(&name);
    let database = match body.remove("$db") {
        Some(Bson::String(db)) => db,
        _ => "admin".to_string(),
    };
    let mut args = body;

    // Documents from a sequence section are injected under the section path.
    if let Some((path, docs)) = sequence {
        args.insert(
            path,
            Bson::Array(docs.into_iter().map(Bson::Document).collect()),
        );
    }

    command::decode_command(
        header,
        ReplyFormat::OpMsg,
        NamespacedCollection::new(database, collection),
        &name,
        args,
    )
}

/// A kind-1 section: a size bounding the section, the argument path the
/// documents will be injected into, then documents back to back until the
/// bound is reached.
fn decode_document_sequence(
    r: &mut Reader<'_>,
) -> Result<(String, Vec<Document>), ProtocolError> {
    let size = r.read_i32("document sequence size")?;
    if size < 4 || size as usize - 4 > r.remaining() {
        return Err(ProtocolError::MalformedMessage(format!(
            "invalid document sequence size {}",
            size
        )));
    }
    let end = r.position() + size as usize - 4;

    let path = r.read_cstring(end - r.position())?;
    if path.contains('.') {
        return Err(ProtocolError::MalformedMessage(format!(
            "document sequence path {:?} must not contain '.'",
            path
        )));
    }

    let mut docs = Vec::new();
    while r.position() < end {
        docs.push(r.read_document()?);
    }
    if r.position() != end {
        return Err(ProtocolError::MalformedMessage(
            "document sequence overran its section".to_string(),
        ));
    }

    Ok((path, docs))
}

/// Unrecognized opcodes are preserved verbatim rather than rejected.
fn decode_unknown(header: RpcHeader, r: &mut Reader<'_>) -> Result<Request, ProtocolError> {
    Ok(Request::Unknown(UnknownRequest {
        info: info(header, RequestType::Unknown, ReplyFormat::None),
        payload: r.read_to_end().to_vec(),
    }))
}

/// Splits a command document into its name (the first field's key) and the
/// remaining arguments, preserving their order.
fn split_command(doc: &Document, what: &str) -> Result<(String, Document), ProtocolError> {
    let name = doc
        .iter()
        .next()
        .map(|(key, _)| key.clone())
        .ok_or_else(|| ProtocolError::MalformedMessage(format!("empty {} command", what)))?;

    let mut args = Document::new();
    for (key, value) in doc.iter() {
        if *key != name {
            args.insert(key.clone(), value.clone());
        }
    }
    Ok((name, args))
}
