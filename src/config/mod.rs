//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (schema.rs)
//!     → config file (TOML) via loader.rs
//!     → CLI overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc by every request task
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the gateway is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Misconfiguration fails at construction, before any request is served

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    GatewayConfig, InterpreterConfig, ListenerConfig, ObservabilityConfig, ServerConfig,
    StatusPage,
};
pub use validation::ValidationError;
