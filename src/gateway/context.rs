//! Per-request state owned by exactly one request driver.
//!
//! # Responsibilities
//! - Track the pipeline state for logs
//! - Hold the resolved script, its interpreter and its environment
//! - Own the response channel: whether the head was sent, and whether the
//!   client is still there to receive anything

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::cgi::CgiEnv;
use crate::http::response::{streaming_response, BodyChunk};
use crate::http::RequestId;

/// Pipeline position of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Routing,
    Checking,
    Spawning,
    Streaming,
    Completed,
    Errored,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Routing => "routing",
            RequestState::Checking => "checking",
            RequestState::Spawning => "spawning",
            RequestState::Streaming => "streaming",
            RequestState::Completed => "completed",
            RequestState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Everything the gateway knows about one accepted request.
#[derive(Debug)]
pub struct RequestContext {
    pub id: RequestId,
    pub method: Method,
    /// Request target as received, for logs.
    pub uri: String,
    /// Script path relative to the base directory.
    pub script: String,
    pub script_path: PathBuf,
    pub interpreter: Option<String>,
    pub env: CgiEnv,
    pub started: Instant,
    state: RequestState,
}

impl RequestContext {
    pub fn new(id: RequestId, method: Method, uri: String, script: String) -> Self {
        Self {
            id,
            method,
            uri,
            script,
            script_path: PathBuf::new(),
            interpreter: None,
            env: CgiEnv::new(),
            started: Instant::now(),
            state: RequestState::Routing,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`. Terminal states absorb every later transition.
    pub fn transition(&mut self, next: RequestState) {
        if matches!(self.state, RequestState::Completed | RequestState::Errored) {
            return;
        }
        tracing::trace!(
            request_id = %self.id,
            from = %self.state,
            to = %next,
            "Request state change"
        );
        self.state = next;
    }
}

/// The client gave up on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientGone;

/// Where response bytes go: first the head, then body chunks.
#[derive(Debug)]
pub enum ResponseSink {
    /// Nothing sent yet; the handler is waiting for a response.
    Pending(oneshot::Sender<Response<Body>>),
    /// Head sent; body chunks flow through a bounded channel.
    Streaming {
        tx: mpsc::Sender<BodyChunk>,
        status: StatusCode,
    },
    /// The response is complete or has been abandoned.
    Closed,
}

impl ResponseSink {
    pub fn new(tx: oneshot::Sender<Response<Body>>) -> Self {
        ResponseSink::Pending(tx)
    }

    /// True once a response head has been handed to the client.
    pub fn started(&self) -> bool {
        !matches!(self, ResponseSink::Pending(_))
    }

    /// Status of the response that was sent, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ResponseSink::Streaming { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Resolves when the client can no longer receive anything.
    pub async fn closed(&mut self) {
        match self {
            ResponseSink::Pending(tx) => tx.closed().await,
            ResponseSink::Streaming { tx, .. } => tx.closed().await,
            ResponseSink::Closed => std::future::pending().await,
        }
    }

    /// Send the head and the first body slice.
    pub fn start(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        first: Bytes,
    ) -> Result<(), ClientGone> {
        let ResponseSink::Pending(head_tx) = std::mem::replace(self, ResponseSink::Closed) else {
            return Err(ClientGone);
        };

        let (tx, rx) = mpsc::channel(1);
        if !first.is_empty() {
            // fresh channel with capacity 1
            let _ = tx.try_send(Ok(first));
        }
        head_tx
            .send(streaming_response(status, headers, rx))
            .map_err(|_| ClientGone)?;

        *self = ResponseSink::Streaming { tx, status };
        Ok(())
    }

    /// Forward one body chunk, waiting while the client is slow.
    pub async fn send(&mut self, chunk: Bytes) -> Result<(), ClientGone> {
        let ResponseSink::Streaming { tx, .. } = self else {
            return Err(ClientGone);
        };
        if tx.send(Ok(chunk)).await.is_err() {
            *self = ResponseSink::Closed;
            return Err(ClientGone);
        }
        Ok(())
    }

    /// Complete a streaming body normally.
    pub fn finish(&mut self) {
        *self = ResponseSink::Closed;
    }

    /// End the request with `response` if nothing was sent yet; otherwise
    /// abort the connection. Returns the status the client will see.
    pub fn fail(&mut self, response: Response<Body>) -> Option<StatusCode> {
        match std::mem::replace(self, ResponseSink::Closed) {
            ResponseSink::Pending(head_tx) => {
                let status = response.status();
                head_tx.send(response).ok().map(|_| status)
            }
            ResponseSink::Streaming { tx, status } => {
                // may wait behind a chunk the client has not read yet
                tokio::spawn(async move {
                    let _ = tx
                        .send(Err(io::Error::other("CGI response aborted")))
                        .await;
                });
                Some(status)
            }
            ResponseSink::Closed => None,
        }
    }
}
