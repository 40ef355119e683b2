//! Capture of raw request/response streams to length-prefixed sinks.

use crate::error::ServerError;
use crate::handler::RequestHandler;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A destination for captured wire frames.
pub type CaptureSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A sink that drops everything written to it.
pub fn discard_sink() -> CaptureSink {
    Box::new(tokio::io::sink())
}

struct Sinks {
    requests: CaptureSink,
    responses: CaptureSink,
    /// Reusable buffer the wrapped handler replies into.
    response_buf: Vec<u8>,
}

/// Wraps another handler and writes a length-prefixed copy of each raw
/// request and each produced response to the capture sinks.
///
/// The whole record-dispatch-record sequence runs under one lock, so frames
/// from interleaved connections never corrupt the capture files.
pub struct Recorder {
    sinks: Mutex<Sinks>,
    inner: Box<dyn RequestHandler>,
}

impl Recorder {
    pub fn new(requests: CaptureSink, responses: CaptureSink, inner: Box<dyn RequestHandler>) -> Self {
        Self {
            sinks: Mutex::new(Sinks {
                requests,
                responses,
                response_buf: Vec::new(),
            }),
            inner,
        }
    }
}

/// One capture record: `len i32 LE` followed by exactly `len` frame bytes.
async fn write_record(sink: &mut CaptureSink, frame: &[u8]) -> Result<(), ServerError> {
    sink.write_all(&(frame.len() as i32).to_le_bytes()).await?;
    sink.write_all(frame).await?;
    sink.flush().await?;
    Ok(())
}

#[async_trait]
impl RequestHandler for Recorder {
    async fn handle_request(
        &self,
        client_id: &str,
        client: &mut (dyn AsyncWrite + Send + Unpin),
        frame: &[u8],
    ) -> Result<(), ServerError> {
        let mut guard = self.sinks.lock().await;
        let sinks = &mut *guard;

        write_record(&mut sinks.requests, frame).await?;

        // Let the wrapped handler reply into a buffer so the response can be
        // captured before it goes to the real client.
        sinks.response_buf.clear();
        self.inner
            .handle_request(client_id, &mut sinks.response_buf, frame)
            .await?;

        write_record(&mut sinks.responses, &sinks.response_buf).await?;

        client.write_all(&sinks.response_buf).await?;
        Ok(())
    }

    async fn remove_client(&self, client_id: &str) -> Result<(), ServerError> {
        self.inner.remove_client(client_id).await
    }
}
