//! The request handler capability the connection loop drives.

use crate::error::ServerError;
use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Processes framed requests from mongo clients.
///
/// Implementations receive the raw frame (header included) and write any
/// reply in wire format to the provided writer. Returning an error
/// terminates the connection.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one framed request. A reply, if the request calls for one,
    /// must be written as a single fully prepared buffer.
    async fn handle_request(
        &self,
        client_id: &str,
        client: &mut (dyn AsyncWrite + Send + Unpin),
        frame: &[u8],
    ) -> Result<(), ServerError>;

    /// Invoked once when the client disconnects, so per-client state can be
    /// cleaned up.
    async fn remove_client(&self, client_id: &str) -> Result<(), ServerError>;
}
