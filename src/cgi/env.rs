//! CGI/1.1 environment construction.
//!
//! # Responsibilities
//! - Map every request header `X-Y` to `HTTP_X_Y`
//! - Fill the request/server/script meta-variables
//! - Derive client and server endpoints, honoring the trust-proxy policy
//! - Merge the configured extension last so it wins ties
//!
//! # Design Decisions
//! - Pure function of its inputs; calling it twice yields the same map
//! - Only `PATH` is copied from the host environment
//! - BTreeMap keeps the variable order stable for logging and tests

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::http::ConnectionInfo;
use crate::routing::resolver::{path_info, request_pathname, request_query};

/// The flat variable set handed to a CGI child.
pub type CgiEnv = BTreeMap<String, String>;

/// Computes extra variables from the builtins and the request.
pub type EnvHook = Arc<dyn Fn(&CgiEnv, &Parts) -> HashMap<String, String> + Send + Sync>;

pub const GATEWAY_INTERFACE: &str = "CGI/1.1";

/// Extra variables merged over the builtins.
#[derive(Clone, Default)]
pub enum EnvExtension {
    #[default]
    None,
    Static(HashMap<String, String>),
    Computed(EnvHook),
}

impl fmt::Debug for EnvExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvExtension::None => write!(f, "None"),
            EnvExtension::Static(vars) => f.debug_tuple("Static").field(vars).finish(),
            EnvExtension::Computed(_) => write!(f, "Computed(<fn>)"),
        }
    }
}

/// Where the resolved script lives.
#[derive(Debug, Clone, Copy)]
pub struct ScriptPaths<'a> {
    /// Path relative to the base directory ("files/script.cgi").
    pub relative: &'a str,
    /// Absolute path on disk.
    pub full: &'a Path,
}

/// Builds the CGI environment for one request.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    trust_proxy: bool,
    extension: EnvExtension,
    server_software: String,
    search_path: String,
}

impl EnvironmentBuilder {
    pub fn new(trust_proxy: bool, extension: EnvExtension) -> Self {
        Self {
            trust_proxy,
            extension,
            server_software: format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            search_path: std::env::var("PATH").unwrap_or_default(),
        }
    }

    /// Override the `PATH` handed to scripts.
    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = path.into();
        self
    }

    pub fn with_extension(mut self, extension: EnvExtension) -> Self {
        self.extension = extension;
        self
    }

    pub fn extension(&self) -> &EnvExtension {
        &self.extension
    }

    pub fn build(&self, parts: &Parts, conn: &ConnectionInfo, script: ScriptPaths<'_>) -> CgiEnv {
        let mut env = CgiEnv::new();

        for name in parts.headers.keys() {
            let key = format!("HTTP_{}", name.as_str().replace('-', "_").to_uppercase());
            env.insert(key, joined_header(&parts.headers, name.as_str()));
        }
        if let Some(value) = env.get("HTTP_CONTENT_TYPE").cloned() {
            env.insert("CONTENT_TYPE".into(), value);
        }
        if let Some(value) = env.get("HTTP_CONTENT_LENGTH").cloned() {
            env.insert("CONTENT_LENGTH".into(), value);
        }

        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        env.insert("GATEWAY_INTERFACE".into(), GATEWAY_INTERFACE.into());
        env.insert("QUERY_STRING".into(), request_query(&request_uri));
        env.insert("REQUEST_METHOD".into(), parts.method.as_str().into());
        env.insert("REQUEST_URI".into(), request_uri.clone());
        env.insert("PATH".into(), self.search_path.clone());
        env.insert("SERVER_PROTOCOL".into(), format!("{:?}", parts.version));
        env.insert("SERVER_SOFTWARE".into(), self.server_software.clone());
        env.insert(
            "SCRIPT_FILENAME".into(),
            script.full.to_string_lossy().into_owned(),
        );
        env.insert("SCRIPT_NAME".into(), format!("/{}", script.relative));

        if let Some(info) = request_pathname(&request_uri).and_then(|p| path_info(&p)) {
            env.insert("PATH_INFO".into(), info);
        }

        self.insert_endpoints(&mut env, &parts.headers, conn);

        if let Some(auth_type) = header_str(&parts.headers, AUTHORIZATION.as_str())
            .and_then(|v| v.split_whitespace().next().map(str::to_string))
        {
            env.insert("AUTH_TYPE".into(), auth_type);
        }

        match &self.extension {
            EnvExtension::None => {}
            EnvExtension::Static(vars) => {
                env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            EnvExtension::Computed(hook) => {
                let extra = hook(&env, parts);
                env.extend(extra);
            }
        }

        env
    }

    fn insert_endpoints(&self, env: &mut CgiEnv, headers: &HeaderMap, conn: &ConnectionInfo) {
        let forwarded_for = self
            .trust_proxy
            .then(|| header_str(headers, "x-forwarded-for"))
            .flatten()
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        match (forwarded_for, conn.remote_addr) {
            (Some(addr), _) => {
                env.insert("REMOTE_ADDR".into(), addr);
            }
            (None, Some(remote)) => {
                env.insert("REMOTE_ADDR".into(), remote.ip().to_string());
                env.insert("REMOTE_PORT".into(), remote.port().to_string());
            }
            (None, None) => {}
        }

        let forwarded_https = self.trust_proxy
            && header_str(headers, "x-forwarded-proto")
                .and_then(|v| v.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
        let secure = conn.encrypted || forwarded_https;
        if secure {
            env.insert("HTTPS".into(), "on".into());
        }

        let host = header_str(headers, HOST.as_str()).map(|h| split_host(h, secure));
        let server = match (self.trust_proxy, host, conn.local_addr) {
            (true, Some(host), _) => Some(host),
            (_, _, Some(local)) => Some(local_endpoint(local)),
            (false, Some(host), None) => Some(host),
            _ => None,
        };
        if let Some((name, port)) = server {
            env.insert("SERVER_NAME".into(), name);
            env.insert("SERVER_PORT".into(), port);
        }
    }
}

fn local_endpoint(addr: SocketAddr) -> (String, String) {
    (addr.ip().to_string(), addr.port().to_string())
}

/// "example.org:8080" → ("example.org", "8080"); IPv6 literals keep their brackets.
fn split_host(host: &str, secure: bool) -> (String, String) {
    let default_port = if secure { "443" } else { "80" };
    let host = host.trim();
    let (name, port) = if let Some(end) = host.rfind(']') {
        let (name, rest) = host.split_at(end + 1);
        (name, rest.strip_prefix(':'))
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (host, None),
        }
    };
    let port = port
        .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(default_port);
    (name.to_string(), port.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn joined_header(headers: &HeaderMap, name: &str) -> String {
    let separator = if name == "cookie" { "; " } else { ", " };
    headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(separator)
}
