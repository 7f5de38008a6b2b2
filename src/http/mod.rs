//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, connection info)
//!     → request.rs (request identity, connection facts)
//!     → [gateway decides: handle or forward]
//!     → response.rs (streamed script output, hop-by-hop stripped)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ConnectionInfo, RequestId};
pub use server::GatewayServer;
