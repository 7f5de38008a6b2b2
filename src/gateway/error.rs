//! Gateway failure taxonomy and its HTTP status mapping.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

use crate::cgi::HeaderError;

/// Everything that can end a request the gateway accepted.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("script not found")]
    NotFound,

    #[error("{} is not executable", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("CGI output exceeds {limit} bytes")]
    OutputTooLarge { limit: u64 },

    #[error(transparent)]
    MalformedOutput(#[from] HeaderError),

    #[error("CGI process failed: {detail}")]
    ProcessFailure { detail: String },

    #[error("CGI process timed out")]
    Timeout,

    #[error("client went away")]
    Aborted,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::OutputTooLarge { .. }
            | GatewayError::MalformedOutput(_)
            | GatewayError::ProcessFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // never rendered; the client cannot receive it
            GatewayError::Aborted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound => "not_found",
            GatewayError::PermissionDenied { .. } => "permission_denied",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::OutputTooLarge { .. } => "output_too_large",
            GatewayError::MalformedOutput(_) => "malformed_output",
            GatewayError::ProcessFailure { .. } => "process_failure",
            GatewayError::Timeout => "timeout",
            GatewayError::Aborted => "aborted",
        }
    }
}
