//! Pipe-through handler for proxying to a real upstream mongod.

use crate::error::ServerError;
use crate::framer::Framer;
use crate::handler::RequestHandler;
use crate::stream::ProxyStream;
use crate::tls;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Timeout for establishing the upstream connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS settings for the upstream connection.
#[derive(Debug, Clone, Default)]
pub struct RelayTlsConfig {
    /// PEM file with CA certificate(s) for verifying the upstream; system
    /// web roots are used when absent.
    pub ca_cert_path: Option<PathBuf>,
    /// Skip upstream certificate verification.
    pub insecure: bool,
    /// SNI name override; defaults to the host portion of the address.
    pub server_name: Option<String>,
}

struct Upstream {
    stream: ProxyStream,
    framer: Framer,
}

/// Relays raw frames between connected clients and a remote mongod: each
/// request is written upstream verbatim, then exactly one reply frame is
/// read back and forwarded to the client.
pub struct RemoteRelay {
    upstream: Mutex<Upstream>,
}

impl RemoteRelay {
    /// Connects to the upstream mongod, optionally over TLS.
    pub async fn connect(addr: &str, tls_config: Option<RelayTlsConfig>) -> Result<Self, ServerError> {
        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ServerError::UpstreamConnectTimeout(addr.to_string()))??;

        let stream = match tls_config {
            Some(cfg) => {
                let connector = tls::connector(cfg.ca_cert_path.as_deref(), cfg.insecure)?;
                let name = tls::server_name(addr, cfg.server_name.as_deref())?;
                let tls_stream = connector
                    .connect(name, tcp)
                    .await
                    .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
                ProxyStream::ClientTls { stream: tls_stream }
            }
            None => ProxyStream::Plain { stream: tcp },
        };

        tracing::info!(upstream = addr, tls = stream.is_tls(), "connected to upstream mongod");

        Ok(Self {
            upstream: Mutex::new(Upstream {
                stream,
                framer: Framer::new(),
            }),
        })
    }
}

#[async_trait]
impl RequestHandler for RemoteRelay {
    async fn handle_request(
        &self,
        _client_id: &str,
        client: &mut (dyn AsyncWrite + Send + Unpin),
        frame: &[u8],
    ) -> Result<(), ServerError> {
        let mut guard = self.upstream.lock().await;
        let upstream = &mut *guard;

        upstream.stream.write_all(frame).await?;

        // The upstream reply uses the same framing as requests; forward it
        // as one fully buffered message.
        let reply = upstream
            .framer
            .next_frame(&mut upstream.stream)
            .await?
            .ok_or(ServerError::UpstreamClosed)?;
        client.write_all(reply).await?;
        Ok(())
    }

    async fn remove_client(&self, _client_id: &str) -> Result<(), ServerError> {
        Ok(())
    }
}
