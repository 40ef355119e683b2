//! mongotap - a transparent proxy speaking the MongoDB wire protocol.
//!
//! Clients connect as if to a mongod; traffic is either piped to a real
//! upstream server or answered locally through a pluggable backend, with
//! optional capture of the raw byte streams for offline analysis.

mod analyze;

use clap::{Parser, Subcommand};
use mongotap_server::recorder::{discard_sink, CaptureSink};
use mongotap_server::{
    tls, Backend, Config, Dispatcher, DummyBackend, ProxyServer, Recorder, RelayTlsConfig,
    RemoteRelay, RequestHandler, ServerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongotap")]
#[command(about = "A transparent proxy that speaks the MongoDB wire protocol")]
#[command(version)]
struct Cli {
    /// Address to listen on for incoming client connections
    #[arg(long)]
    listen_addr: Option<String>,

    /// Combined PEM file (certificate chain + private key) enabling TLS on
    /// the listener
    #[arg(long)]
    tls_pem: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emulate a mongo server using a pluggable backend
    Serve {
        /// Backend to answer requests with
        #[arg(long, default_value = "dummy")]
        backend: String,
    },

    /// Helper tools
    Tools {
        #[command(subcommand)]
        tool: Tools,
    },
}

#[derive(Subcommand)]
enum Tools {
    /// Proxy incoming connections to a remote mongod instance
    Proxy {
        /// Address of the remote mongod to proxy connections to
        #[arg(long, default_value = "127.0.0.1:27017")]
        remote_addr: String,

        /// Connect to the remote mongod over TLS
        #[arg(long)]
        remote_tls: bool,

        /// CA certificate bundle for verifying the remote mongod
        #[arg(long)]
        remote_ca_cert: Option<PathBuf>,

        /// Skip TLS verification when connecting to the remote mongod
        #[arg(long)]
        remote_tls_no_verify: bool,

        /// Record raw client requests to this file
        #[arg(long)]
        record_requests_to: Option<PathBuf>,

        /// Record raw server responses to this file
        #[arg(long)]
        record_responses_to: Option<PathBuf>,
    },

    /// Decode and pretty-print a captured request stream
    Analyze {
        /// Capture file to read, or "-" for stdin
        file: String,

        /// Skip this many captured requests before decoding
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Stop after this many requests (0 = no limit)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Only show requests of these types (comma separated)
        #[arg(long, value_delimiter = ',')]
        filter: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "terminating due to error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { backend } => {
            let backend: Arc<dyn Backend> = match backend.as_str() {
                "dummy" => Arc::new(DummyBackend),
                other => {
                    return Err(format!(
                        "unsupported backend {:?}: supported values are: dummy",
                        other
                    )
                    .into())
                }
            };
            tracing::info!(backend = backend.name(), "emulating mongo server");

            let handler = Arc::new(Dispatcher::new(Some(backend)));
            run_server(&cli, handler).await
        }

        Commands::Tools { tool } => match tool {
            Tools::Proxy {
                remote_addr,
                remote_tls,
                remote_ca_cert,
                remote_tls_no_verify,
                record_requests_to,
                record_responses_to,
            } => {
                let tls_config = if *remote_tls || remote_ca_cert.is_some() || *remote_tls_no_verify
                {
                    if *remote_tls_no_verify {
                        tracing::warn!(
                            "disabling TLS verification when connecting to remote mongod"
                        );
                    }
                    Some(RelayTlsConfig {
                        ca_cert_path: remote_ca_cert.clone(),
                        insecure: *remote_tls_no_verify,
                        server_name: None,
                    })
                } else {
                    None
                };

                let mut handler: Box<dyn RequestHandler> =
                    Box::new(RemoteRelay::connect(remote_addr, tls_config).await?);

                if record_requests_to.is_some() || record_responses_to.is_some() {
                    let requests = capture_sink(record_requests_to.as_deref(), "requests").await?;
                    let responses =
                        capture_sink(record_responses_to.as_deref(), "responses").await?;
                    handler = Box::new(Recorder::new(requests, responses, handler));
                }

                run_server(&cli, Arc::from(handler)).await
            }

            Tools::Analyze {
                file,
                offset,
                limit,
                filter,
            } => analyze::run(file, *offset, *limit, filter),
        },
    }
}

async fn capture_sink(
    path: Option<&std::path::Path>,
    what: &str,
) -> Result<CaptureSink, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            tracing::info!(to = ?path, "recording {}", what);
            Ok(Box::new(tokio::fs::File::create(path).await?))
        }
        None => Ok(discard_sink()),
    }
}

async fn run_server(
    cli: &Cli,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    if let Some(ref addr) = cli.listen_addr {
        config.network.listen_addr = addr.clone();
    }
    if let Some(ref pem) = cli.tls_pem {
        config.tls.pem_path = Some(pem.clone());
    }
    config.validate()?;

    let mut server_config = ServerConfig::new(config.network.listen_addr()?);
    if let Some(ref pem) = config.tls.pem_path {
        server_config = server_config.with_tls(tls::acceptor_from_pem(pem)?);
    }

    let server = Arc::new(ProxyServer::new(server_config, handler));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal, stopping server");
        shutdown_server.shutdown();
    });

    server.run().await?;
    Ok(())
}
