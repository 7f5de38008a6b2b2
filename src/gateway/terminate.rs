//! Synthesized responses for requests the script never answered.
//!
//! # Design Decisions
//! - `text/plain` reason phrase by default
//! - A configured status page replaces the phrase for its status
//! - Debug detail (stderr or error text) wins over a status page for 500/403
//! - 413 closes the connection: the unread body is not drained

use std::collections::HashMap;

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};

use crate::config::validation::parse_status_key;
use crate::config::StatusPage;
use crate::gateway::GatewayError;

/// Renders terminal error responses.
#[derive(Debug, Clone, Default)]
pub struct Terminator {
    debug_output: bool,
    status_pages: HashMap<StatusCode, StatusPage>,
}

impl Terminator {
    /// Keys that do not parse as a status code are skipped; validation
    /// rejects them before a gateway is built.
    pub fn new(debug_output: bool, pages: &HashMap<String, StatusPage>) -> Self {
        let status_pages = pages
            .iter()
            .filter_map(|(key, page)| {
                let code = parse_status_key(key)?;
                let status = StatusCode::from_u16(code).ok()?;
                Some((status, page.clone()))
            })
            .collect();
        Self {
            debug_output,
            status_pages,
        }
    }

    /// Response for `error`, with the child's stderr as debug detail if any.
    pub fn render(&self, error: &GatewayError, stderr: &[u8]) -> Response<Body> {
        let status = error.status();

        let detail = match error {
            GatewayError::PermissionDenied { .. } => Some(error.to_string()),
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                if stderr.is_empty() {
                    Some(error.to_string())
                } else {
                    Some(String::from_utf8_lossy(stderr).into_owned())
                }
            }
            _ => None,
        };

        let mut response = match detail.filter(|_| self.debug_output) {
            Some(detail) => plain(
                status,
                format!("{}: {}\n\n{}", status.as_u16(), reason(status), detail),
            ),
            None => self.status_response(status),
        };

        if status == StatusCode::PAYLOAD_TOO_LARGE {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }

    /// Plain status response, using a configured page when one exists.
    pub fn status_response(&self, status: StatusCode) -> Response<Body> {
        match self.status_pages.get(&status) {
            Some(page) => {
                let mut response = Response::new(Body::from(page.content.clone()));
                *response.status_mut() = status;
                let content_type = HeaderValue::from_str(&page.content_type)
                    .unwrap_or_else(|_| HeaderValue::from_static("text/html"));
                response.headers_mut().insert(CONTENT_TYPE, content_type);
                response
            }
            None => plain(status, reason(status).to_string()),
        }
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown")
}

fn plain(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
