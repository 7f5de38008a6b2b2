//! HTTP-to-CGI gateway library.

pub mod cgi;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::{GatewayConfig, ServerConfig};
pub use gateway::{Gateway, GatewayError, Outcome};
pub use http::{ConnectionInfo, GatewayServer};
pub use lifecycle::Shutdown;
