//! The TCP accept loop and per-connection lifecycle.

use crate::error::ServerError;
use crate::framer::Framer;
use crate::handler::RequestHandler;
use crate::stream::ProxyStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Listener configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to listen on for client connections.
    pub listen_addr: SocketAddr,
    /// TLS acceptor for the listener, if TLS is enabled.
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            tls_acceptor: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Accepts mongo client connections and drives the framer/handler loop for
/// each of them on its own task.
pub struct ProxyServer {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    shutdown: broadcast::Sender<()>,

    /// Live connections, keyed by client id. Cleared when the server shuts
    /// down.
    connections: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            shutdown: shutdown_tx,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the accept loop until shutdown is signalled, then waits for all
    /// in-flight connection tasks to finish.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(
            listen_addr = %self.config.listen_addr,
            tls = self.config.tls_enabled(),
            "listening for incoming client connections"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tasks.push(self.spawn_connection(stream, addr));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "unable to accept incoming connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        // Every connection loop observes the same shutdown signal; wait for
        // all of them to unwind before returning.
        drop(listener);
        for task in tasks {
            let _ = task.await;
        }
        self.connections.lock().clear();

        tracing::info!("shutting down");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let connections = self.connections.clone();
        let tls_acceptor = self.config.tls_acceptor.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let client_id = addr.to_string();

            let stream = match maybe_tls_accept(stream, tls_acceptor.as_deref()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(client = %client_id, error = %e, "TLS handshake failed");
                    return;
                }
            };

            connections.lock().insert(client_id.clone(), addr);
            tracing::info!(client = %client_id, tls = stream.is_tls(), "connection established");

            match serve_connection(stream, &client_id, handler.as_ref(), &mut shutdown).await {
                Ok(()) => tracing::info!(client = %client_id, "client disconnected; EOF"),
                Err(ServerError::ShuttingDown) => {
                    tracing::debug!(client = %client_id, "connection closed by shutdown")
                }
                Err(e) => tracing::error!(client = %client_id, error = %e, "terminating connection"),
            }

            connections.lock().remove(&client_id);
            if let Err(e) = handler.remove_client(&client_id).await {
                tracing::warn!(client = %client_id, error = %e, "client removal hook failed");
            }
        })
    }

    /// Signals every connection loop and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Number of currently connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

async fn maybe_tls_accept(
    stream: TcpStream,
    acceptor: Option<&TlsAcceptor>,
) -> Result<ProxyStream, ServerError> {
    match acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
            Ok(ProxyStream::ServerTls { stream: tls_stream })
        }
        None => Ok(ProxyStream::Plain { stream }),
    }
}

/// Frames requests off the connection and hands them to the handler until
/// EOF, an error, or shutdown. The socket closes when the stream drops.
async fn serve_connection(
    mut stream: ProxyStream,
    client_id: &str,
    handler: &dyn RequestHandler,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let mut framer = Framer::new();

    loop {
        let frame = tokio::select! {
            result = framer.next_frame(&mut stream) => {
                match result? {
                    Some(frame) => frame,
                    None => return Ok(()),
                }
            }
            _ = shutdown.recv() => {
                return Err(ServerError::ShuttingDown);
            }
        };

        handler.handle_request(client_id, &mut stream, frame).await?;
    }
}
