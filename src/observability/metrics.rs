//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cgi_requests_total` (counter): handled requests by method, status
//! - `cgi_request_duration_seconds` (histogram): time to response completion
//! - `cgi_failures_total` (counter): gateway failures by kind
//! - `cgi_processes_killed_total` (counter): forced kills after the grace delay
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the recorder
//! - Prometheus scrape endpoint on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    ::metrics::counter!(
        "cgi_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    ::metrics::histogram!(
        "cgi_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_failure(kind: &'static str) {
    ::metrics::counter!("cgi_failures_total", "kind" => kind).increment(1);
}

pub fn record_forced_kill() {
    ::metrics::counter!("cgi_processes_killed_total").increment(1);
}
