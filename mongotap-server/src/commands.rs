//! Built-in handlers for common mongo client commands.
//!
//! These answer the handshake-ish commands every driver and shell sends, so
//! clients can connect even when the backend handles nothing. Registry keys
//! are stored upper-cased for case-insensitive lookup.

use crate::backend::Backend;
use crate::error::BackendError;
use mongotap_protocol::request::CommandRequest;
use mongotap_protocol::{CommandError, ErrorCode, Response};
use bson::doc;
use std::collections::HashMap;

/// The emulated mongod version.
const EMULATED_VERSION: &str = "3.6.8";

pub(crate) type CommandFn =
    fn(Option<&dyn Backend>, &str, &CommandRequest) -> Result<Response, BackendError>;

/// Builds the registry of built-in command handlers. Keys are upper-cased
/// once here; lookups upper-case the incoming command name.
pub(crate) fn registry() -> HashMap<String, CommandFn> {
    let all: [(&str, CommandFn); 5] = [
        ("isMaster", is_master),
        ("whatsMyUri", whats_my_uri),
        ("buildInfo", build_info),
        ("replSetGetStatus", repl_set_get_status),
        ("getLog", get_log),
    ];

    all.iter()
        .map(|(name, handler)| (name.to_uppercase(), *handler))
        .collect()
}

fn is_master(
    _backend: Option<&dyn Backend>,
    client_id: &str,
    _req: &CommandRequest,
) -> Result<Response, BackendError> {
    Ok(Response::with_document(doc! {
        "ok": 1,
        "ismaster": true,
        "secondary": false,
        "readOnly": false,
        "maxBsonObjectSize": mongotap_protocol::MAX_BSON_OBJECT_SIZE,
        "maxMessageSizeBytes": mongotap_protocol::MAX_MESSAGE_SIZE,
        "maxWriteBatchSize": 10_000,
        "localTime": bson::DateTime::now(),
        "connectionId": client_id,
        "minWireVersion": 1,
        "maxWireVersion": 6,
    }))
}

fn whats_my_uri(
    _backend: Option<&dyn Backend>,
    client_id: &str,
    _req: &CommandRequest,
) -> Result<Response, BackendError> {
    Ok(Response::with_document(doc! {
        "ok": 1,
        "you": client_id,
    }))
}

fn build_info(
    _backend: Option<&dyn Backend>,
    _client_id: &str,
    _req: &CommandRequest,
) -> Result<Response, BackendError> {
    Ok(Response::with_document(doc! {
        "ok": 1,
        "version": EMULATED_VERSION,
        "versionArray": [3, 6, 8, 0],
        "maxBsonObjectSize": mongotap_protocol::MAX_BSON_OBJECT_SIZE,
    }))
}

fn repl_set_get_status(
    _backend: Option<&dyn Backend>,
    _client_id: &str,
    req: &CommandRequest,
) -> Result<Response, BackendError> {
    if req.collection.database != "admin" {
        return Err(CommandError::new(
            ErrorCode::UNAUTHORIZED,
            "replSetGetStatus may only be run against the admin database.",
        )
        .into());
    }

    // Emulate a server with replication disabled.
    Err(CommandError::new(ErrorCode::NO_REPLICATION_ENABLED, "not running with --replSet").into())
}

fn get_log(
    backend: Option<&dyn Backend>,
    _client_id: &str,
    _req: &CommandRequest,
) -> Result<Response, BackendError> {
    let backend_name = backend.map(|b| b.name()).unwrap_or("none");
    let banner = format!(
        r#"
                          _
 _ __ ___  ___ _ __   __ _ ___ | |_ __ _ _ __
| '_ ` _ \/ _ \ '_ \ / _` / _ \| __/ _` | '_ \
| | | | | | (_) | | | (_| (_) | || (_| | |_) |
|_| |_| |_|\___/|_| |_|\__, \___/ \__\__,_| .__/
                       |___/              |_|

Greetings from your friendly neighborhood mongotap server.
Serving incoming client requests using the {:?} backend.
"#,
        backend_name
    );

    Ok(Response::with_document(doc! {
        "ok": 1,
        // Abuse the log command to show a banner in the mongo shell.
        "log": banner.split('\n').collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use mongotap_protocol::request::{
        NamespacedCollection, ReplyFormat, RequestInfo, RequestType, RpcHeader,
    };
    use bson::{Bson, Document};

    fn command_request(database: &str, command: &str) -> CommandRequest {
        CommandRequest {
            info: RequestInfo {
                header: RpcHeader {
                    message_length: 16,
                    request_id: 1,
                    response_to: 0,
                    opcode: mongotap_protocol::OP_QUERY,
                },
                request_type: RequestType::Command,
                reply_format: ReplyFormat::OpReply,
            },
            collection: NamespacedCollection::new(database, "$cmd"),
            command: command.to_string(),
            args: Document::new(),
        }
    }

    #[test]
    fn test_registry_keys_are_upper_cased() {
        let reg = registry();
        assert_eq!(reg.len(), 5);
        for key in reg.keys() {
            assert_eq!(key, &key.to_uppercase());
        }
        assert!(reg.contains_key("ISMASTER"));
        assert!(reg.contains_key("REPLSETGETSTATUS"));
    }

    #[test]
    fn test_is_master_document() {
        let req = command_request("admin", "isMaster");
        let res = is_master(None, "127.0.0.1:5555", &req).unwrap();
        assert_eq!(res.documents.len(), 1);

        let doc = &res.documents[0];
        assert_eq!(doc.get("ok"), Some(&Bson::Int32(1)));
        assert_eq!(doc.get("ismaster"), Some(&Bson::Boolean(true)));
        assert_eq!(doc.get("secondary"), Some(&Bson::Boolean(false)));
        assert_eq!(
            doc.get_str("connectionId").unwrap(),
            "127.0.0.1:5555"
        );
        assert_eq!(doc.get("maxBsonObjectSize"), Some(&Bson::Int32(16 * 1024 * 1024)));
        assert_eq!(doc.get("maxMessageSizeBytes"), Some(&Bson::Int32(48_000_000)));
        assert_eq!(doc.get("minWireVersion"), Some(&Bson::Int32(1)));
        assert_eq!(doc.get("maxWireVersion"), Some(&Bson::Int32(6)));
        assert!(matches!(doc.get("localTime"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn test_whats_my_uri() {
        let req = command_request("admin", "whatsMyUri");
        let res = whats_my_uri(None, "client-9", &req).unwrap();
        assert_eq!(res.documents[0], doc! {"ok": 1, "you": "client-9"});
    }

    #[test]
    fn test_build_info() {
        let req = command_request("admin", "buildInfo");
        let res = build_info(None, "c", &req).unwrap();
        let doc = &res.documents[0];
        assert_eq!(doc.get_str("version").unwrap(), "3.6.8");
        assert_eq!(
            doc.get("versionArray"),
            Some(&Bson::Array(vec![
                Bson::Int32(3),
                Bson::Int32(6),
                Bson::Int32(8),
                Bson::Int32(0)
            ]))
        );
    }

    #[test]
    fn test_repl_set_get_status_outside_admin() {
        let req = command_request("test", "replSetGetStatus");
        let err = repl_set_get_status(None, "c", &req).unwrap_err();
        let BackendError::Command(cmd_err) = err else {
            panic!("expected command error");
        };
        assert_eq!(cmd_err.code, ErrorCode::UNAUTHORIZED);
        assert_eq!(
            cmd_err.message,
            "replSetGetStatus may only be run against the admin database."
        );
    }

    #[test]
    fn test_repl_set_get_status_against_admin() {
        let req = command_request("admin", "replSetGetStatus");
        let err = repl_set_get_status(None, "c", &req).unwrap_err();
        let BackendError::Command(cmd_err) = err else {
            panic!("expected command error");
        };
        assert_eq!(cmd_err.code, ErrorCode::NO_REPLICATION_ENABLED);
        assert_eq!(cmd_err.message, "not running with --replSet");
    }

    #[test]
    fn test_get_log_banner_names_backend() {
        let req = command_request("admin", "getLog");
        let backend = DummyBackend;
        let res = get_log(Some(&backend), "c", &req).unwrap();
        let log = res.documents[0].get_array("log").unwrap();
        assert!(log
            .iter()
            .any(|line| line.as_str().is_some_and(|l| l.contains("\"dummy\""))));

        let res = get_log(None, "c", &req).unwrap();
        let log = res.documents[0].get_array("log").unwrap();
        assert!(log
            .iter()
            .any(|line| line.as_str().is_some_and(|l| l.contains("\"none\""))));
    }
}
