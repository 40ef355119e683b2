//! # mongotap-server
//!
//! Proxy-side machinery for mongotap.
//!
//! This crate provides:
//! - Frame-at-a-time reading of mongo wire messages off a client stream
//! - The dispatcher that routes decoded requests through a pluggable
//!   backend and the built-in command library
//! - A recorder that captures raw request/response streams to disk
//! - A relay handler that pipes traffic to a real upstream mongod
//! - The TCP accept loop with optional TLS and coordinated shutdown

pub mod backend;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod handler;
pub mod recorder;
pub mod relay;
pub mod server;
pub mod stream;
pub mod tls;

pub use backend::{Backend, DummyBackend};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{BackendError, ServerError};
pub use framer::Framer;
pub use handler::RequestHandler;
pub use recorder::Recorder;
pub use relay::{RemoteRelay, RelayTlsConfig};
pub use server::{ProxyServer, ServerConfig};
pub use stream::ProxyStream;
