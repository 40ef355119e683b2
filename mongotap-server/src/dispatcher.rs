//! Request dispatch: decode, consult the backend, fall back to built-in
//! commands, reply in the envelope the client expects.

use crate::backend::Backend;
use crate::commands::{self, CommandFn};
use crate::error::{BackendError, ServerError};
use crate::handler::RequestHandler;
use async_trait::async_trait;
use bson::doc;
use dashmap::DashMap;
use mongotap_protocol::request::CommandRequest;
use mongotap_protocol::{
    decode, encode_response, ReplyFormat, Request, Response, ResponseFlags,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Emulates a mongo server by delegating requests to a pluggable backend
/// and answering a subset of common commands itself.
///
/// Errors that occur after a request was fully framed do not kill the
/// connection: they are either reported in an error reply, or, for requests
/// whose envelope carries no reply, buffered per client for retrieval via a
/// later `getLastError`.
pub struct Dispatcher {
    backend: Option<Arc<dyn Backend>>,

    /// Built-in command handlers, keyed by upper-cased command name.
    /// Initialized once at construction, never mutated.
    commands: HashMap<String, CommandFn>,

    /// The last error seen per client. Entries for one client never
    /// invalidate concurrent reads for another.
    last_error: DashMap<String, BackendError>,
}

impl Dispatcher {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            backend,
            commands: commands::registry(),
            last_error: DashMap::new(),
        }
    }

    /// Returns the buffered error for a client, if any.
    pub fn last_error(&self, client_id: &str) -> Option<BackendError> {
        self.last_error.get(client_id).map(|entry| entry.clone())
    }

    async fn process(&self, client_id: &str, request: &Request) -> Result<Response, BackendError> {
        let result = match &self.backend {
            Some(backend) => backend.handle(client_id, request).await,
            None => Err(BackendError::Unsupported),
        };

        // When the backend passes, commands get a second chance with the
        // built-in library.
        if matches!(&result, Err(err) if err.is_unsupported()) {
            if let Request::Command(cmd) = request {
                return self.dispatch_builtin(client_id, cmd);
            }
        }

        result
    }

    fn dispatch_builtin(
        &self,
        client_id: &str,
        cmd: &CommandRequest,
    ) -> Result<Response, BackendError> {
        match self.commands.get(&cmd.command.to_uppercase()) {
            Some(handler) => handler(self.backend.as_deref(), client_id, cmd),
            None => {
                tracing::warn!(client = client_id, command = %cmd.command, "unsupported command");
                Err(BackendError::UnsupportedCommand(cmd.command.clone()))
            }
        }
    }
}

/// Converts a dispatch error into a reply payload for the given envelope.
///
/// OP_REPLY errors carry `$err`; OP_MSG errors carry `errmsg`, plus `code`
/// and `codeName` when the error has a mongo status code.
fn error_response(err: &BackendError, format: ReplyFormat) -> Response {
    let flags = if matches!(err, BackendError::InvalidCursor) {
        ResponseFlags::new().with_cursor_not_found()
    } else {
        ResponseFlags::new().with_query_error()
    };

    let mut doc = match format {
        ReplyFormat::OpMsg => match err {
            BackendError::Command(cmd_err) => doc! {
                "errmsg": cmd_err.message.clone(),
                "code": cmd_err.code.code(),
                "codeName": cmd_err.code.name(),
            },
            _ => doc! {"errmsg": err.to_string()},
        },
        _ => doc! {"$err": err.to_string()},
    };
    doc.insert("ok", 0);

    Response {
        flags,
        cursor_id: 0,
        starting_from: 0,
        documents: vec![doc],
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle_request(
        &self,
        client_id: &str,
        client: &mut (dyn AsyncWrite + Send + Unpin),
        frame: &[u8],
    ) -> Result<(), ServerError> {
        // A frame that cannot be decoded terminates the connection.
        let request = decode(frame)?;
        tracing::debug!(
            client = client_id,
            request_type = %request.request_type(),
            request_id = request.request_id(),
            "dispatching request"
        );

        let reply_format = request.reply_format();
        let response = match self.process(client_id, &request).await {
            Ok(response) => {
                // Only the most recent status is retained.
                self.last_error.remove(client_id);
                response
            }
            Err(err) => {
                self.last_error.insert(client_id.to_string(), err.clone());
                if reply_format == ReplyFormat::None {
                    // Nothing goes on the wire; the error waits for the next
                    // getLastError.
                    return Ok(());
                }
                // The error reaches the client in-band, so nothing stays
                // buffered.
                self.last_error.remove(client_id);
                error_response(&err, reply_format)
            }
        };

        if reply_format != ReplyFormat::None {
            let bytes = encode_response(&response, request.request_id(), reply_format)?;
            client.write_all(&bytes).await?;
        }
        Ok(())
    }

    async fn remove_client(&self, client_id: &str) -> Result<(), ServerError> {
        self.last_error.remove(client_id);
        if let Some(backend) = &self.backend {
            if let Err(err) = backend.remove_client(client_id).await {
                tracing::warn!(client = client_id, error = %err, "backend client removal failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Document;
    use mongotap_protocol::{CommandError, ErrorCode, HEADER_LEN};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A backend that replays scripted results and records what it saw.
    struct ScriptedBackend {
        results: Mutex<VecDeque<Result<Response, BackendError>>>,
        seen_request_ids: Mutex<Vec<i32>>,
        removed: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(results: Vec<Result<Response, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                seen_request_ids: Mutex::new(Vec::new()),
                removed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(
            &self,
            _client_id: &str,
            request: &Request,
        ) -> Result<Response, BackendError> {
            self.seen_request_ids.lock().push(request.request_id());
            self.results
                .lock()
                .pop_front()
                .unwrap_or(Err(BackendError::Unsupported))
        }

        async fn remove_client(&self, _client_id: &str) -> Result<(), BackendError> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn put_cstring(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    fn put_doc(buf: &mut Vec<u8>, doc: &Document) {
        doc.to_writer(&mut *buf).unwrap();
    }

    fn frame(request_id: i32, opcode: i32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_LEN + payload.len()) as i32).to_le_bytes());
        out.extend_from_slice(&request_id.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn query_cmd_frame(request_id: i32, namespace: &str, cmd: &Document) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        put_cstring(&mut payload, namespace);
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&1i32.to_le_bytes());
        put_doc(&mut payload, cmd);
        frame(request_id, mongotap_protocol::OP_QUERY, &payload)
    }

    fn insert_frame(request_id: i32, namespace: &str, docs: &[Document]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        put_cstring(&mut payload, namespace);
        for d in docs {
            put_doc(&mut payload, d);
        }
        frame(request_id, mongotap_protocol::OP_INSERT, &payload)
    }

    fn op_msg_frame(request_id: i32, body: &Document) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.push(0u8);
        put_doc(&mut payload, body);
        frame(request_id, mongotap_protocol::OP_MSG, &payload)
    }

    fn header_of(buf: &[u8]) -> (i32, i32, i32, i32) {
        let field = |i: usize| i32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        (field(0), field(1), field(2), field(3))
    }

    fn op_reply_parts(buf: &[u8]) -> (u32, Document) {
        let flags = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let doc = Document::from_reader(&mut std::io::Cursor::new(&buf[36..])).unwrap();
        (flags, doc)
    }

    #[tokio::test]
    async fn test_is_master_round_trip_without_backend() {
        let dispatcher = Dispatcher::new(None);
        let raw = query_cmd_frame(468, "admin.$cmd", &doc! {"isMaster": 1});

        let mut out = Vec::new();
        dispatcher
            .handle_request("client-1", &mut out, &raw)
            .await
            .unwrap();

        let (len, _, response_to, opcode) = header_of(&out);
        assert_eq!(len as usize, out.len());
        assert_eq!(response_to, 468);
        assert_eq!(opcode, mongotap_protocol::OP_REPLY);

        let (flags, doc) = op_reply_parts(&out);
        assert_eq!(flags, 0);
        assert_eq!(doc.get("ok"), Some(&bson::Bson::Int32(1)));
        assert_eq!(doc.get("ismaster"), Some(&bson::Bson::Boolean(true)));
        assert_eq!(doc.get_str("connectionId").unwrap(), "client-1");
    }

    #[tokio::test]
    async fn test_successful_insert_writes_nothing_and_clears_last_error() {
        let backend = ScriptedBackend::new(vec![Ok(Response::default())]);
        let dispatcher = Dispatcher::new(Some(backend.clone() as Arc<dyn Backend>));

        // Seed a stale error for the client.
        dispatcher
            .last_error
            .insert("c".to_string(), BackendError::InvalidCursor);

        let raw = insert_frame(5, "test.coll", &[doc! {"a": 1}, doc! {"b": 2}]);
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        assert!(out.is_empty());
        assert!(dispatcher.last_error("c").is_none());
    }

    #[tokio::test]
    async fn test_invalid_cursor_sets_cursor_not_found_flag() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::InvalidCursor)]);
        let dispatcher = Dispatcher::new(Some(backend as Arc<dyn Backend>));

        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        put_cstring(&mut payload, "test.coll");
        payload.extend_from_slice(&10i32.to_le_bytes());
        payload.extend_from_slice(&42i64.to_le_bytes());
        let raw = frame(33, mongotap_protocol::OP_GET_MORE, &payload);

        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        let (_, _, response_to, opcode) = header_of(&out);
        assert_eq!(response_to, 33);
        assert_eq!(opcode, mongotap_protocol::OP_REPLY);

        let (flags, doc) = op_reply_parts(&out);
        assert_eq!(flags, ResponseFlags::CURSOR_NOT_FOUND);
        assert_eq!(doc.get_str("$err").unwrap(), "invalid cursor");
        assert_eq!(doc.get("ok"), Some(&bson::Bson::Int32(0)));
    }

    #[tokio::test]
    async fn test_repl_set_get_status_error_over_op_msg() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Unsupported)]);
        let dispatcher = Dispatcher::new(Some(backend as Arc<dyn Backend>));

        let raw = op_msg_frame(91, &doc! {"replSetGetStatus": 1, "$db": "test"});
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        let (len, _, response_to, opcode) = header_of(&out);
        assert_eq!(len as usize, out.len());
        assert_eq!(response_to, 91);
        assert_eq!(opcode, mongotap_protocol::OP_MSG);

        // flagBits then a kind-0 section.
        assert_eq!(u32::from_le_bytes(out[16..20].try_into().unwrap()), 0);
        assert_eq!(out[20], 0);
        let doc = Document::from_reader(&mut std::io::Cursor::new(&out[21..])).unwrap();
        assert_eq!(
            doc.get_str("errmsg").unwrap(),
            "replSetGetStatus may only be run against the admin database."
        );
        assert_eq!(doc.get("ok"), Some(&bson::Bson::Int32(0)));
        assert_eq!(doc.get("code"), Some(&bson::Bson::Int32(13)));
        assert_eq!(doc.get_str("codeName").unwrap(), "Unauthorized");
    }

    #[tokio::test]
    async fn test_backend_called_once_per_frame_in_order() {
        let backend = ScriptedBackend::new(vec![
            Ok(Response::default()),
            Ok(Response::default()),
            Ok(Response::default()),
        ]);
        let dispatcher = Dispatcher::new(Some(backend.clone() as Arc<dyn Backend>));

        let mut out = Vec::new();
        for id in [101, 102, 103] {
            let raw = insert_frame(id, "test.coll", &[doc! {"n": id}]);
            dispatcher.handle_request("c", &mut out, &raw).await.unwrap();
        }

        assert_eq!(*backend.seen_request_ids.lock(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_no_reply_error_is_buffered_for_get_last_error() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Unsupported)]);
        let dispatcher = Dispatcher::new(Some(backend as Arc<dyn Backend>));

        let raw = insert_frame(7, "test.coll", &[doc! {"a": 1}]);
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        // No bytes on the wire, but the error is observable afterwards.
        assert!(out.is_empty());
        assert_eq!(dispatcher.last_error("c"), Some(BackendError::Unsupported));
    }

    #[tokio::test]
    async fn test_unsupported_command_falls_back_then_reports() {
        let dispatcher = Dispatcher::new(None);

        let raw = query_cmd_frame(12, "admin.$cmd", &doc! {"fsync": 1});
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        let (flags, doc) = op_reply_parts(&out);
        assert_eq!(flags, ResponseFlags::QUERY_ERROR);
        assert_eq!(
            doc.get_str("$err").unwrap(),
            "command \"fsync\": unsupported request"
        );
        // The error was delivered in-band, so nothing stays buffered.
        assert!(dispatcher.last_error("c").is_none());
    }

    #[tokio::test]
    async fn test_builtin_lookup_is_case_insensitive() {
        let dispatcher = Dispatcher::new(None);

        let raw = query_cmd_frame(1, "admin.$cmd", &doc! {"ISMASTER": 1});
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        let (_, doc) = op_reply_parts(&out);
        assert_eq!(doc.get("ismaster"), Some(&bson::Bson::Boolean(true)));
    }

    #[tokio::test]
    async fn test_backend_command_error_carries_code() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Command(CommandError::new(
            ErrorCode(211),
            "key mismatch",
        )))]);
        let dispatcher = Dispatcher::new(Some(backend as Arc<dyn Backend>));

        let raw = op_msg_frame(4, &doc! {"ping": 1});
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();

        let doc = Document::from_reader(&mut std::io::Cursor::new(&out[21..])).unwrap();
        assert_eq!(doc.get_str("errmsg").unwrap(), "key mismatch");
        assert_eq!(doc.get("code"), Some(&bson::Bson::Int32(211)));
        assert_eq!(doc.get_str("codeName").unwrap(), "Unknown");
    }

    #[tokio::test]
    async fn test_decode_failure_terminates_connection() {
        let dispatcher = Dispatcher::new(None);

        // An OP_MSG frame with a garbage body section.
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.push(9u8);
        let raw = frame(1, mongotap_protocol::OP_MSG, &payload);

        let mut out = Vec::new();
        let result = dispatcher.handle_request("c", &mut out, &raw).await;
        assert!(matches!(result, Err(ServerError::Protocol(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_remove_client_purges_state_and_notifies_backend() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Unsupported)]);
        let dispatcher = Dispatcher::new(Some(backend.clone() as Arc<dyn Backend>));

        let raw = insert_frame(7, "test.coll", &[doc! {"a": 1}]);
        let mut out = Vec::new();
        dispatcher.handle_request("c", &mut out, &raw).await.unwrap();
        assert!(dispatcher.last_error("c").is_some());

        dispatcher.remove_client("c").await.unwrap();
        assert!(dispatcher.last_error("c").is_none());
        assert_eq!(backend.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_response_shapes() {
        let err = BackendError::InvalidCursor;
        let res = error_response(&err, ReplyFormat::OpReply);
        assert!(res.flags.cursor_not_found());
        assert_eq!(res.documents[0].get_str("$err").unwrap(), "invalid cursor");

        let err = BackendError::Command(CommandError::new(ErrorCode::UNAUTHORIZED, "nope"));
        let res = error_response(&err, ReplyFormat::OpMsg);
        assert!(res.flags.query_error());
        let doc = &res.documents[0];
        assert_eq!(doc.get_str("errmsg").unwrap(), "nope");
        assert_eq!(doc.get("code"), Some(&bson::Bson::Int32(13)));
        assert_eq!(doc.get_str("codeName").unwrap(), "Unauthorized");
        assert_eq!(doc.get("ok"), Some(&bson::Bson::Int32(0)));
    }
}
