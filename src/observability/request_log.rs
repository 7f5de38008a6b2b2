//! One log line per request.
//!
//! # Responsibilities
//! - Format `METHOD URI : STATUS` lines
//! - Suppress a second line for a request that was already logged
//! - Keep the dedup table bounded; the oldest entry goes first
//!
//! # Design Decisions
//! - The only state shared between requests in the gateway
//! - A plain mutex: the critical section is a few hash operations

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use axum::http::{Method, StatusCode};

use crate::http::RequestId;

/// Default number of remembered request ids.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<RequestId>,
    order: VecDeque<RequestId>,
}

/// Bounded, deduplicating request logger.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    seen: Arc<Mutex<Seen>>,
    capacity: usize,
}

impl RequestLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Seen::default())),
            capacity: capacity.max(1),
        }
    }

    /// Record the request and return its log line, or `None` if this request
    /// was already logged.
    pub fn record(
        &self,
        id: RequestId,
        method: &Method,
        uri: &str,
        status: StatusCode,
    ) -> Option<String> {
        let mut seen = self.seen.lock().ok()?;
        if seen.ids.contains(&id) {
            return None;
        }

        while seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        seen.ids.insert(id);
        seen.order.push_back(id);

        Some(format!("{} {} : {}", method, uri, status.as_u16()))
    }

    /// Record and emit through `tracing`.
    pub fn log(&self, id: RequestId, method: &Method, uri: &str, status: StatusCode) {
        if let Some(line) = self.record(id, method, uri, status) {
            tracing::info!(request_id = %id, "{}", line);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
