//! Gateway subsystem: the per-request CGI pipeline.
//!
//! # Data Flow
//! ```text
//! Request + ConnectionInfo
//!     → Routing   (PathResolver: outside url_path → Outcome::Forward)
//!     → Checking  (Content-Length cap, file exists, exec bit)
//!     → Spawning  (EnvironmentBuilder, InterpreterSelector, ProcessSupervisor)
//!     → Streaming (driver.rs task: body in, output out)
//!     → Completed | Errored (terminate.rs renders the failure)
//!     → Outcome::Handled(response)
//! ```
//!
//! # Design Decisions
//! - Configuration is validated when the gateway is built, never per request
//! - A routing miss is a value, not an error: the request comes back untouched
//! - Each request owns its context and child; the request log is the only
//!   state shared between requests

pub mod context;
mod driver;
pub mod error;
pub mod terminate;

use std::collections::HashMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::cgi::{
    CgiCommand, CgiEnv, EnvExtension, EnvHook, EnvironmentBuilder, ProcessSupervisor, ScriptPaths,
};
use crate::config::validation::validate_gateway;
use crate::config::{ConfigError, GatewayConfig};
use crate::http::{ConnectionInfo, RequestId};
use crate::observability::{metrics, RequestLogger};
use crate::routing::{InterpreterSelector, PathResolver};

pub use context::{RequestContext, RequestState, ResponseSink};
pub use error::GatewayError;
pub use terminate::Terminator;

use driver::RequestDriver;

/// Result of offering a request to the gateway.
#[derive(Debug)]
pub enum Outcome {
    /// The gateway answered the request.
    Handled(Response<Body>),
    /// The URL is outside the gateway's prefix; the request is returned as is.
    ///
    /// The prefix only matches on a path-segment boundary: with `/cgi-bin`,
    /// `/cgi-bin/a.sh` is handled but `/cgi-binary/a.sh` is forwarded. The
    /// bundled [`GatewayServer`](crate::http::GatewayServer) answers forwarded
    /// requests with `404 outside of url path <url_path>`; embedders choose
    /// their own fallback.
    Forward(Request<Body>),
}

/// Byte limits applied to both directions of a request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamLimits {
    pub max_buffer: u64,
    pub request_chunk_size: usize,
    pub response_chunk_size: usize,
}

/// State handed to request drivers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub terminator: Terminator,
    pub request_log: RequestLogger,
    pub log_requests: bool,
    pub limits: StreamLimits,
    pub timeout: Duration,
}

impl Shared {
    /// Record the final status of a request.
    pub(crate) fn finish(&self, ctx: &RequestContext, status: StatusCode) {
        if self.log_requests {
            self.request_log.log(ctx.id, &ctx.method, &ctx.uri, status);
        }
        metrics::record_request(ctx.method.as_str(), status.as_u16(), ctx.started);
    }
}

/// An HTTP-to-CGI gateway bound to one configuration.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    base_dir: PathBuf,
    resolver: PathResolver,
    interpreters: InterpreterSelector,
    env_builder: EnvironmentBuilder,
    supervisor: ProcessSupervisor,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Build a gateway, failing fast on an invalid configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        validate_gateway(&config)?;

        let base_dir = if config.file_path.is_absolute() {
            config.file_path.clone()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::Io)?
                .join(&config.file_path)
        };

        let extension = if config.env.is_empty() {
            EnvExtension::None
        } else {
            EnvExtension::Static(config.env.clone())
        };

        let shared = Shared {
            terminator: Terminator::new(config.debug_output, &config.status_pages),
            request_log: RequestLogger::default(),
            log_requests: config.log_requests,
            limits: StreamLimits {
                max_buffer: config.max_buffer as u64,
                request_chunk_size: config.request_chunk_size,
                response_chunk_size: config.response_chunk_size,
            },
            timeout: config.request_timeout(),
        };

        Ok(Self {
            base_dir,
            resolver: PathResolver::new(&config.url_path, &config.index_extension),
            interpreters: InterpreterSelector::new(config.extensions.clone()),
            env_builder: EnvironmentBuilder::new(config.trust_proxy, extension),
            supervisor: ProcessSupervisor::new(
                config.request_timeout(),
                config.force_kill_delay(),
            ),
            shared: Arc::new(shared),
            config,
        })
    }

    /// Compute extra variables per request. Static `env` entries from the
    /// configuration still apply; the hook's values win ties.
    pub fn with_env_hook(mut self, hook: EnvHook) -> Self {
        let extension = match self.env_builder.extension().clone() {
            EnvExtension::Static(vars) => {
                let combined: EnvHook = Arc::new(move |env: &CgiEnv, parts: &Parts| {
                    let mut merged: HashMap<String, String> = vars.clone();
                    merged.extend(hook(env, parts));
                    merged
                });
                EnvExtension::Computed(combined)
            }
            _ => EnvExtension::Computed(hook),
        };
        self.env_builder = self.env_builder.with_extension(extension);
        self
    }

    /// Override the `PATH` handed to scripts.
    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.env_builder = self.env_builder.with_search_path(path);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Absolute directory scripts are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn url_path(&self) -> &str {
        &self.config.url_path
    }

    /// Run `request` through the gateway.
    pub async fn handle(&self, request: Request<Body>, conn: ConnectionInfo) -> Outcome {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        let Some(script) = self.resolver.resolve(&target) else {
            tracing::trace!(uri = %target, "Outside url path, forwarding");
            return Outcome::Forward(request);
        };

        let ctx = RequestContext::new(
            RequestId::new(),
            request.method().clone(),
            target,
            script,
        );
        let span = tracing::info_span!("cgi", request_id = %ctx.id, script = %ctx.script);
        Outcome::Handled(self.run(ctx, request, conn).instrument(span).await)
    }

    async fn run(
        &self,
        mut ctx: RequestContext,
        request: Request<Body>,
        conn: ConnectionInfo,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        ctx.transition(RequestState::Checking);

        if let Some(length) = content_length(&parts.headers) {
            if length > self.shared.limits.max_buffer {
                let limit = self.shared.limits.max_buffer;
                return self.reject(&mut ctx, GatewayError::PayloadTooLarge { limit });
            }
        }
        if let Err(error) = self.check_script(&mut ctx).await {
            return self.reject(&mut ctx, error);
        }

        ctx.transition(RequestState::Spawning);
        ctx.env = self.env_builder.build(
            &parts,
            &conn,
            ScriptPaths {
                relative: &ctx.script,
                full: &ctx.script_path,
            },
        );

        let command = CgiCommand::for_script(ctx.interpreter.as_deref(), &ctx.script_path);
        let spawned = match self
            .supervisor
            .spawn(&command, &ctx.env, ctx.script_path.parent())
        {
            Ok(spawned) => spawned,
            Err(e) => {
                let error = spawn_error(e, &ctx);
                return self.reject(&mut ctx, error);
            }
        };

        ctx.transition(RequestState::Streaming);
        let (head_tx, head_rx) = oneshot::channel();
        let driver = RequestDriver::new(self.shared.clone(), ctx, ResponseSink::new(head_tx));
        tokio::spawn(driver.run(spawned, body).in_current_span());

        match head_rx.await {
            Ok(response) => response,
            Err(_) => self
                .shared
                .terminator
                .status_response(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// File exists, is a regular file, and may be executed.
    async fn check_script(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        if ctx.script.is_empty() {
            return Err(GatewayError::NotFound);
        }

        let path = self.base_dir.join(&ctx.script);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| GatewayError::NotFound)?;
        if !metadata.is_file() {
            return Err(GatewayError::NotFound);
        }

        ctx.interpreter = self.interpreters.select(&ctx.script).map(str::to_string);
        if self.config.require_exec_bit && ctx.interpreter.is_none() && !is_executable(&metadata)
        {
            return Err(GatewayError::PermissionDenied { path });
        }

        ctx.script_path = path;
        Ok(())
    }

    fn reject(&self, ctx: &mut RequestContext, error: GatewayError) -> Response<Body> {
        ctx.transition(RequestState::Errored);
        tracing::debug!(error = %error, kind = error.kind(), "Request rejected");
        metrics::record_failure(error.kind());

        let response = self.shared.terminator.render(&error, b"");
        self.shared.finish(ctx, response.status());
        response
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn spawn_error(error: io::Error, ctx: &RequestContext) -> GatewayError {
    tracing::warn!(
        script = %ctx.script_path.display(),
        interpreter = ctx.interpreter.as_deref().unwrap_or("-"),
        error = %error,
        "Failed to spawn CGI process"
    );
    if error.kind() == io::ErrorKind::PermissionDenied && ctx.interpreter.is_none() {
        return GatewayError::PermissionDenied {
            path: ctx.script_path.clone(),
        };
    }
    GatewayError::ProcessFailure {
        detail: format!("failed to start {}: {}", ctx.script_path.display(), error),
    }
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_fails_fast() {
        let config = GatewayConfig {
            request_chunk_size: 4096,
            max_buffer: 1024,
            ..GatewayConfig::default()
        };
        assert!(matches!(Gateway::new(config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn relative_file_path_is_made_absolute() {
        let config = GatewayConfig {
            file_path: PathBuf::from("scripts"),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config).unwrap();
        assert!(gateway.base_dir().is_absolute());
        assert!(gateway.base_dir().ends_with("scripts"));
    }

    #[test]
    fn content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, "42".parse().unwrap());
        assert_eq!(content_length(&headers), Some(42));
        headers.insert(CONTENT_LENGTH, "abc".parse().unwrap());
        assert_eq!(content_length(&headers), None);
    }

    #[tokio::test]
    async fn outside_url_path_is_forwarded_untouched() {
        let gateway = Gateway::new(GatewayConfig::default()).unwrap();
        let request = Request::builder()
            .uri("/static/app.css")
            .header("x-marker", "1")
            .body(Body::empty())
            .unwrap();

        match gateway.handle(request, ConnectionInfo::default()).await {
            Outcome::Forward(request) => {
                assert_eq!(request.uri(), "/static/app.css");
                assert_eq!(request.headers()["x-marker"], "1");
            }
            Outcome::Handled(_) => panic!("request should be forwarded"),
        }
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected_before_lookup() {
        let gateway = Gateway::new(GatewayConfig {
            max_buffer: 64,
            request_chunk_size: 64,
            response_chunk_size: 64,
            ..GatewayConfig::default()
        })
        .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/cgi-bin/does-not-exist.cgi")
            .header(CONTENT_LENGTH, "65")
            .body(Body::empty())
            .unwrap();

        let Outcome::Handled(response) = gateway.handle(request, ConnectionInfo::default()).await
        else {
            panic!("request should be handled");
        };
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn missing_script_is_not_found() {
        let gateway = Gateway::new(GatewayConfig::default()).unwrap();
        let request = Request::builder()
            .uri("/cgi-bin/no/such/script.cgi")
            .body(Body::empty())
            .unwrap();

        let Outcome::Handled(response) = gateway.handle(request, ConnectionInfo::default()).await
        else {
            panic!("request should be handled");
        };
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
