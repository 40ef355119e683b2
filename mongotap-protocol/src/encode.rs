//! Reply emission for the OP_REPLY and OP_MSG envelopes.

use crate::error::ProtocolError;
use crate::request::ReplyFormat;
use crate::response::Response;
use bytes::{BufMut, BytesMut};

/// Encodes a response into a full wire message addressed to `request_id`.
///
/// For `ReplyFormat::None` nothing is emitted and an empty buffer is
/// returned. For the other envelopes the `messageLength` header field is
/// patched after the body is written so it always equals the exact number of
/// bytes emitted.
pub fn encode_response(
    response: &Response,
    request_id: i32,
    format: ReplyFormat,
) -> Result<BytesMut, ProtocolError> {
    match format {
        ReplyFormat::None => Ok(BytesMut::new()),
        ReplyFormat::OpReply => encode_op_reply(response, request_id),
        ReplyFormat::OpMsg => encode_op_msg(response, request_id),
    }
}

fn put_header(buf: &mut BytesMut, request_id: i32, opcode: i32) {
    buf.put_i32_le(0); // messageLength, patched once the body is written
    buf.put_i32_le(0); // requestId
    buf.put_i32_le(request_id); // responseTo
    buf.put_i32_le(opcode);
}

fn patch_length(buf: &mut BytesMut) {
    let len = buf.len() as i32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
}

fn put_document(buf: &mut BytesMut, doc: &bson::Document) -> Result<(), ProtocolError> {
    let mut raw = Vec::new();
    doc.to_writer(&mut raw)?;
    buf.put_slice(&raw);
    Ok(())
}

/// OP_REPLY: flags, cursor id, starting offset, document count, documents.
fn encode_op_reply(response: &Response, request_id: i32) -> Result<BytesMut, ProtocolError> {
    let mut buf = BytesMut::with_capacity(64);
    put_header(&mut buf, request_id, crate::OP_REPLY);

    buf.put_u32_le(response.flags.bits());
    buf.put_i64_le(response.cursor_id);
    buf.put_i32_le(response.starting_from);
    buf.put_i32_le(response.documents.len() as i32);
    for doc in &response.documents {
        put_document(&mut buf, doc)?;
    }

    patch_length(&mut buf);
    Ok(buf)
}

/// OP_MSG: zero flag bits and a single kind-0 body section.
fn encode_op_msg(response: &Response, request_id: i32) -> Result<BytesMut, ProtocolError> {
    if response.documents.len() > 1 {
        return Err(ProtocolError::TooManyReplyDocuments(
            response.documents.len(),
        ));
    }

    let mut buf = BytesMut::with_capacity(64);
    put_header(&mut buf, request_id, crate::OP_MSG);

    buf.put_u32_le(0); // flagBits
    buf.put_u8(0); // section kind: body
    if let Some(doc) = response.documents.first() {
        put_document(&mut buf, doc)?;
    }

    patch_length(&mut buf);
    Ok(buf)
}
