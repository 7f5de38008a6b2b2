//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway request drivers produce:
//!     → request_log.rs (one deduplicated line per request)
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (human or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all log events
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod request_log;

pub use logging::init_logging;
pub use request_log::RequestLogger;
