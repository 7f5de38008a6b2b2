//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes and timeouts > 0, chunk sizes within the buffer cap)
//! - Parse status page keys into status codes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, ServerConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} ({size}) must not exceed max_buffer ({max_buffer})")]
    ChunkTooLarge {
        field: &'static str,
        size: usize,
        max_buffer: usize,
    },

    #[error("url_path must start with '/', got {0:?}")]
    UrlPath(String),

    #[error("index_extension must not be empty")]
    IndexExtension,

    #[error("interpreter entry #{0} has an empty command")]
    EmptyCommand(usize),

    #[error("status_pages key {0:?} is not a valid HTTP status code")]
    StatusPageKey(String),

    #[error("invalid bind address {0:?}")]
    BindAddress(String),
}

/// Validate the whole server configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = match validate_gateway(&config.gateway) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the gateway section on its own.
pub fn validate_gateway(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive = [
        ("max_buffer", config.max_buffer as u64),
        ("request_chunk_size", config.request_chunk_size as u64),
        ("response_chunk_size", config.response_chunk_size as u64),
        ("request_timeout_ms", config.request_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let chunks = [
        ("request_chunk_size", config.request_chunk_size),
        ("response_chunk_size", config.response_chunk_size),
    ];
    for (field, size) in chunks {
        if size > config.max_buffer {
            errors.push(ValidationError::ChunkTooLarge {
                field,
                size,
                max_buffer: config.max_buffer,
            });
        }
    }

    if !config.url_path.starts_with('/') {
        errors.push(ValidationError::UrlPath(config.url_path.clone()));
    }

    if config.index_extension.trim().is_empty() {
        errors.push(ValidationError::IndexExtension);
    }

    for (i, entry) in config.extensions.iter().enumerate() {
        if entry.command.trim().is_empty() {
            errors.push(ValidationError::EmptyCommand(i));
        }
    }

    for key in config.status_pages.keys() {
        if parse_status_key(key).is_none() {
            errors.push(ValidationError::StatusPageKey(key.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a status page key ("404") into a status code in 100..=599.
pub fn parse_status_key(key: &str) -> Option<u16> {
    key.trim()
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
}
