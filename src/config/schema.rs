//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// CGI gateway settings.
    pub gateway: GatewayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3001").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
        }
    }
}

/// An interpreter and the file extensions it runs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Interpreter command line, optionally with arguments ("/usr/bin/perl -w").
    pub command: String,

    /// Extensions handled by this interpreter, without the leading dot.
    pub extensions: Vec<String>,
}

impl InterpreterConfig {
    pub fn new(command: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            command: command.into(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Custom body served for a synthesized status.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StatusPage {
    pub content: String,

    #[serde(default = "default_page_content_type")]
    pub content_type: String,
}

fn default_page_content_type() -> String {
    "text/html".to_string()
}

/// CGI gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL prefix served by the gateway.
    pub url_path: String,

    /// Directory holding the CGI scripts.
    pub file_path: PathBuf,

    /// Ordered interpreter table; the first entry listing an extension wins.
    pub extensions: Vec<InterpreterConfig>,

    /// Extension of the index script used for directory URLs.
    pub index_extension: String,

    /// Include child stderr in 500 responses.
    pub debug_output: bool,

    /// Emit one log line per request.
    pub log_requests: bool,

    /// Maximum request body and script output size in bytes.
    pub max_buffer: usize,

    /// Bytes forwarded to the script's stdin per write.
    pub request_chunk_size: usize,

    /// Bytes read from the script's stdout per read.
    pub response_chunk_size: usize,

    /// Wall-clock limit for one script run, in milliseconds.
    pub request_timeout_ms: u64,

    /// Grace period between the stop signal and the forced kill, in milliseconds.
    pub force_kill_delay_ms: u64,

    /// Refuse scripts without the executable bit when no interpreter is mapped.
    pub require_exec_bit: bool,

    /// Trust X-Forwarded-For, X-Forwarded-Proto and Host over the socket.
    pub trust_proxy: bool,

    /// Custom error pages keyed by status code ("404", "500", ...).
    pub status_pages: HashMap<String, StatusPage>,

    /// Extra environment variables passed to every script.
    pub env: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url_path: "/cgi-bin".to_string(),
            file_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            extensions: default_extensions(),
            index_extension: "js".to_string(),
            debug_output: false,
            log_requests: false,
            max_buffer: 2 * 1024 * 1024, // 2MB
            request_chunk_size: 32 * 1024,
            response_chunk_size: 32 * 1024,
            request_timeout_ms: 30_000,
            force_kill_delay_ms: 1_000,
            require_exec_bit: false,
            trust_proxy: false,
            status_pages: HashMap::new(),
            env: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn force_kill_delay(&self) -> Duration {
        Duration::from_millis(self.force_kill_delay_ms)
    }
}

/// Platform default interpreter table.
#[cfg(windows)]
pub fn default_extensions() -> Vec<InterpreterConfig> {
    vec![
        InterpreterConfig::new("perl", &["pl", "cgi"]),
        InterpreterConfig::new("python", &["py"]),
        InterpreterConfig::new("node", &["js", "node"]),
    ]
}

/// Platform default interpreter table.
#[cfg(not(windows))]
pub fn default_extensions() -> Vec<InterpreterConfig> {
    vec![
        InterpreterConfig::new("/usr/bin/perl", &["pl", "cgi"]),
        InterpreterConfig::new("/usr/bin/python", &["py"]),
        InterpreterConfig::new("/usr/local/bin/node", &["js", "node"]),
    ]
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when RUST_LOG is unset.
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "cgi_gateway=info,tower_http=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
