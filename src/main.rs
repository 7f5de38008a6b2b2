//! HTTP-to-CGI gateway
//!
//! Serves CGI scripts from a directory over HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                   CGI GATEWAY                    │
//!                       │                                                  │
//!     Client Request    │  ┌─────────┐    ┌─────────┐    ┌────────────┐   │
//!     ──────────────────┼─▶│  http   │───▶│ gateway │───▶│  routing   │   │
//!                       │  │ server  │    │ handler │    │  resolver  │   │
//!                       │  └─────────┘    └────┬────┘    └────────────┘   │
//!                       │                      │                           │
//!                       │                      ▼                           │
//!                       │               ┌─────────────┐                    │
//!                       │               │ cgi env +   │                    │
//!                       │               │ supervisor  │──── spawn ────────┼──▶ script
//!                       │               └──────┬──────┘                    │
//!                       │                      │ stdout                    │
//!     Client Response   │  ┌─────────┐    ┌────▼────┐                      │
//!     ◀─────────────────┼──│ stream  │◀───│ header  │◀─────────────────────┼─── stdout
//!                       │  │  body   │    │ scanner │                      │
//!                       │  └─────────┘    └─────────┘                      │
//!                       │                                                  │
//!                       │  config · observability · lifecycle              │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use clap::Parser;
use tokio::net::TcpListener;

use cgi_gateway::cgi::{CgiEnv, EnvHook};
use cgi_gateway::config::{load_config, ServerConfig};
use cgi_gateway::lifecycle::{signals, Shutdown};
use cgi_gateway::observability::{init_logging, metrics};
use cgi_gateway::{Gateway, GatewayServer};

#[derive(Parser, Debug)]
#[command(name = "cgi-gateway")]
#[command(about = "Serve CGI scripts over HTTP", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL path for CGI scripts
    #[arg(long)]
    url_path: Option<String>,

    /// Directory containing the CGI scripts
    #[arg(long)]
    file_path: Option<PathBuf>,

    /// Extension of index files served for directory URLs
    #[arg(long)]
    index_extension: Option<String>,

    /// Include script stderr in 500 responses
    #[arg(short, long)]
    debug_output: bool,

    /// Log one line per request
    #[arg(short, long)]
    log_requests: bool,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Trust X-Forwarded-* headers
    #[arg(long)]
    trust_proxy: bool,

    /// Refuse scripts without the executable bit when no interpreter applies
    #[arg(long)]
    require_exec_bit: bool,

    /// Maximum request/response size in bytes
    #[arg(long)]
    max_buffer: Option<usize>,

    /// Request timeout in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
        let gateway = &mut config.gateway;
        if let Some(url_path) = &self.url_path {
            gateway.url_path = url_path.clone();
        }
        if let Some(file_path) = &self.file_path {
            gateway.file_path = file_path.clone();
        }
        if let Some(index_extension) = &self.index_extension {
            gateway.index_extension = index_extension.clone();
        }
        if let Some(max_buffer) = self.max_buffer {
            gateway.max_buffer = max_buffer;
        }
        if let Some(timeout) = self.request_timeout_ms {
            gateway.request_timeout_ms = timeout;
        }
        gateway.debug_output |= self.debug_output;
        gateway.log_requests |= self.log_requests;
        gateway.trust_proxy |= self.trust_proxy;
        gateway.require_exec_bit |= self.require_exec_bit;

        if let Some(port) = self.port {
            let mut addr: SocketAddr = config.listener.bind_address.parse()?;
            addr.set_port(port);
            config.listener.bind_address = addr.to_string();
        }
        Ok(())
    }
}

/// Per-request variables added by the launcher.
fn launcher_env() -> EnvHook {
    Arc::new(|_env: &CgiEnv, parts: &Parts| {
        let mut vars = HashMap::new();
        if let Some(agent) = parts.headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
            vars.insert("REMOTE_AGENT".to_string(), agent.to_string());
        }
        vars.insert("UNIQUE_ID".to_string(), uuid::Uuid::new_v4().to_string());
        vars
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config)?;
    cgi_gateway::config::validation::validate_config(&config)
        .map_err(cgi_gateway::config::ConfigError::Validation)?;

    init_logging(&config.observability);
    tracing::info!(
        "{} v{} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        url_path = %config.gateway.url_path,
        file_path = %config.gateway.file_path.display(),
        max_buffer = config.gateway.max_buffer,
        request_timeout_ms = config.gateway.request_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::new(config.gateway.clone())?.with_env_hook(launcher_env());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    let server = GatewayServer::new(gateway);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
