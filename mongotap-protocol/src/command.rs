//! Sub-decoders for commands tunneled through OP_QUERY and OP_MSG.
//!
//! Write and read commands that mirror a legacy opcode are normalized into
//! the same typed requests the legacy decoders produce, so backends see one
//! request shape regardless of the envelope the client used. Commands
//! without a dedicated sub-decoder fall back to a generic
//! [`CommandRequest`](crate::request::CommandRequest).
//!
//! Schemas follow the documented command references, e.g.
//! <https://www.mongodb.com/docs/manual/reference/command/insert/>.

use crate::error::ProtocolError;
use crate::request::*;
use bson::{Bson, Document};

/// Dispatches a command to its sub-decoder. The produced request inherits
/// `header` and `reply_format` from the carrying envelope.
pub(crate) fn decode_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    name: &str,
    args: Document,
) -> Result<Request, ProtocolError> {
    match name {
        "insert" => insert_command(header, reply_format, collection, args),
        "update" => update_command(header, reply_format, collection, args),
        "delete" => delete_command(header, reply_format, collection, args),
        "find" => find_command(header, reply_format, collection, args),
        "findAndModify" => find_and_modify_command(header, reply_format, collection, args),
        _ => Ok(Request::Command(CommandRequest {
            info: RequestInfo {
                header,
                request_type: RequestType::Command,
                reply_format,
            },
            collection,
            command: name.to_string(),
            args,
        })),
    }
}

fn malformed(command: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedCommand {
        command,
        reason: reason.into(),
    }
}

fn doc_arg(args: &Document, key: &str) -> Option<Document> {
    match args.get(key) {
        Some(Bson::Document(d)) => Some(d.clone()),
        _ => None,
    }
}

fn bool_arg(args: &Document, key: &str) -> Option<bool> {
    args.get(key).and_then(Bson::as_bool)
}

fn int_arg(args: &Document, key: &str) -> Option<i64> {
    match args.get(key) {
        Some(Bson::Int32(n)) => Some(*n as i64),
        Some(Bson::Int64(n)) => Some(*n),
        _ => None,
    }
}

/// Extracts a list of documents, failing when the value is not an array of
/// documents.
fn doc_list(
    args: &Document,
    key: &str,
    command: &'static str,
    what: &str,
) -> Result<Vec<Document>, ProtocolError> {
    let Some(Bson::Array(items)) = args.get(key) else {
        return Err(malformed(command, format!("invalid {} list", what)));
    };

    let mut docs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item {
            Bson::Document(d) => docs.push(d.clone()),
            _ => {
                return Err(malformed(
                    command,
                    format!("invalid {} at index {}", what, i),
                ))
            }
        }
    }
    Ok(docs)
}

/// Optional top-level `arrayFilters` argument shared by update-style
/// commands.
fn array_filters(args: &Document, command: &'static str) -> Result<Vec<Document>, ProtocolError> {
    if args.get("arrayFilters").is_none() {
        return Ok(Vec::new());
    }
    doc_list(args, "arrayFilters", command, "array filter")
}

fn insert_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    args: Document,
) -> Result<Request, ProtocolError> {
    let documents = doc_list(&args, "documents", "insert", "document")?;

    let mut flags = InsertFlags::new();
    if bool_arg(&args, "ordered") == Some(false) {
        flags = flags.with_continue_on_error();
    }

    Ok(Request::Insert(InsertRequest {
        info: RequestInfo {
            header,
            request_type: RequestType::Insert,
            reply_format,
        },
        collection,
        flags,
        documents,
    }))
}

fn update_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    args: Document,
) -> Result<Request, ProtocolError> {
    let update_docs = doc_list(&args, "updates", "update", "update doc")?;
    let filters = array_filters(&args, "update")?;

    let mut updates = Vec::with_capacity(update_docs.len());
    for update_doc in update_docs {
        let mut flags = UpdateFlags::new();
        if bool_arg(&update_doc, "upsert") == Some(true) {
            flags = flags.with_upsert();
        }
        if bool_arg(&update_doc, "multi") == Some(true) {
            flags = flags.with_multi();
        }
        updates.push(UpdateTarget {
            selector: doc_arg(&update_doc, "q").unwrap_or_default(),
            update: doc_arg(&update_doc, "u").unwrap_or_default(),
            array_filters: filters.clone(),
            flags,
        });
    }

    Ok(Request::Update(UpdateRequest {
        info: RequestInfo {
            header,
            request_type: RequestType::Update,
            reply_format,
        },
        collection,
        updates,
    }))
}

fn delete_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    args: Document,
) -> Result<Request, ProtocolError> {
    let delete_docs = doc_list(&args, "deletes", "delete", "delete doc")?;

    let deletes = delete_docs
        .into_iter()
        .map(|delete_doc| DeleteTarget {
            selector: doc_arg(&delete_doc, "q").unwrap_or_default(),
            limit: int_arg(&delete_doc, "limit").unwrap_or(0) as i32,
        })
        .collect();

    Ok(Request::Delete(DeleteRequest {
        info: RequestInfo {
            header,
            request_type: RequestType::Delete,
            reply_format,
        },
        collection,
        deletes,
    }))
}

fn find_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    args: Document,
) -> Result<Request, ProtocolError> {
    Ok(Request::Query(QueryRequest {
        info: RequestInfo {
            header,
            request_type: RequestType::Query,
            reply_format,
        },
        collection,
        flags: QueryFlags::new(),
        num_to_skip: int_arg(&args, "skip").unwrap_or(0) as i32,
        num_to_return: int_arg(&args, "limit").unwrap_or(0) as i32,
        query: doc_arg(&args, "filter").unwrap_or_default(),
        sort: doc_arg(&args, "sort").unwrap_or_default(),
        field_selector: doc_arg(&args, "projection").unwrap_or_default(),
    }))
}

/// findAndModify splits into two request types: `remove: true` produces a
/// find-and-delete, everything else a find-and-update (which then requires
/// an update document).
fn find_and_modify_command(
    header: RpcHeader,
    reply_format: ReplyFormat,
    collection: NamespacedCollection,
    args: Document,
) -> Result<Request, ProtocolError> {
    let query = doc_arg(&args, "query").unwrap_or_default();
    let sort = doc_arg(&args, "sort").unwrap_or_default();
    let field_selector = doc_arg(&args, "fields").unwrap_or_default();

    if bool_arg(&args, "remove") == Some(true) {
        return Ok(Request::FindAndDelete(FindAndDeleteRequest {
            info: RequestInfo {
                header,
                request_type: RequestType::FindAndDelete,
                reply_format,
            },
            collection,
            query,
            sort,
            field_selector,
        }));
    }

    let update = doc_arg(&args, "update")
        .ok_or_else(|| malformed("findAndModify", "missing update document in arg list"))?;

    Ok(Request::FindAndUpdate(FindAndUpdateRequest {
        info: RequestInfo {
            header,
            request_type: RequestType::FindAndUpdate,
            reply_format,
        },
        collection,
        query,
        sort,
        update,
        array_filters: array_filters(&args, "findAndModify")?,
        upsert: bool_arg(&args, "upsert") == Some(true),
        return_updated: bool_arg(&args, "new") == Some(true),
        field_selector,
    }))
}
