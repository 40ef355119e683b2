//! The pluggable backend capability behind the dispatcher.

use crate::error::BackendError;
use async_trait::async_trait;
use mongotap_protocol::{Request, Response};

/// Emulates mongo behavior for decoded requests.
///
/// A backend that cannot process a request returns
/// [`BackendError::Unsupported`]; the dispatcher then falls back to the
/// built-in command library before giving up.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The backend's name, shown in logs and the `getLog` banner.
    fn name(&self) -> &str;

    /// Processes a decoded client request and produces a response payload.
    async fn handle(&self, client_id: &str, request: &Request) -> Result<Response, BackendError>;

    /// Invoked when a client disconnects so the backend can drop any state
    /// it tracks for it.
    async fn remove_client(&self, client_id: &str) -> Result<(), BackendError>;
}

/// A backend that rejects every request, leaving all work to the built-in
/// command library. Useful for exercising clients against the bare
/// emulation layer.
pub struct DummyBackend;

#[async_trait]
impl Backend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn handle(&self, _client_id: &str, _request: &Request) -> Result<Response, BackendError> {
        Err(BackendError::Unsupported)
    }

    async fn remove_client(&self, _client_id: &str) -> Result<(), BackendError> {
        Ok(())
    }
}
