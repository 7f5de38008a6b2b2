//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the gateway as its fallback handler
//! - Wire up middleware (tracing, request ID)
//! - Capture connection endpoints for the CGI environment
//! - Answer requests the gateway forwards back
//! - Serve until the shutdown signal fires

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::gateway::{Gateway, Outcome};
use crate::http::ConnectionInfo;
use crate::lifecycle::shutdown::ShutdownSignal;

/// Standalone HTTP server in front of one gateway.
pub struct GatewayServer {
    router: Router,
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    pub fn new(gateway: Gateway) -> Self {
        let gateway = Arc::new(gateway);
        let router = Self::build_router(gateway.clone());
        Self { router, gateway }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(gateway: Arc<Gateway>) -> Router {
        Router::new()
            .fallback(gateway_handler)
            .with_state(gateway)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// The router, for embedding or driving without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            url_path = %self.gateway.url_path(),
            base_dir = %self.gateway.base_dir().display(),
            "CGI gateway starting"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<ConnectionInfo>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Fallback handler: every request is offered to the gateway.
async fn gateway_handler(State(gateway): State<Arc<Gateway>>, request: Request<Body>) -> Response {
    let conn = request
        .extensions()
        .get::<ConnectInfo<ConnectionInfo>>()
        .map(|ConnectInfo(conn)| *conn)
        .unwrap_or_default();

    match gateway.handle(request, conn).await {
        Outcome::Handled(response) => response,
        Outcome::Forward(request) => {
            tracing::debug!(uri = %request.uri(), "Request outside url path");
            outside_url_path(gateway.url_path())
        }
    }
}

fn outside_url_path(url_path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        format!("outside of url path {}", url_path),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn forwarded_requests_get_404() {
        let server = GatewayServer::new(Gateway::new(GatewayConfig::default()).unwrap());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"outside of url path /cgi-bin");
    }
}
