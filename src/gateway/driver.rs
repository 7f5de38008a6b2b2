//! The task that runs one CGI request once its child is spawned.
//!
//! # Data Flow
//! ```text
//! request body ──pump task──▶ child stdin
//! child stdout ──OutputReader──▶ HeaderScanner ──head──▶ oneshot ──▶ handler
//!                                              └─body──▶ mpsc(1) ──▶ client
//! child stderr ──collector task──▶ StderrBuffer (debug 500 bodies, logs)
//! ```
//!
//! # Design Decisions
//! - A single select loop watches output, upload, deadline and the client
//! - Timeout and client disconnect end the loop the same way: I/O is
//!   dropped first, the response (if any) goes out, then the child is
//!   stopped with the grace delay
//! - Only body chunks block on the client; the deadline still applies

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::cgi::{
    pump_request_body, CgiProcess, HeaderError, HeaderScanner, OutputError, OutputReader,
    RequestBodyOutcome, SpawnedProcess, StderrBuffer,
};
use crate::gateway::context::{RequestContext, RequestState, ResponseSink};
use crate::gateway::{GatewayError, Shared};

/// How long to wait for trailing stderr once the child has exited.
const STDERR_SETTLE: Duration = Duration::from_millis(100);

pub(crate) struct RequestDriver {
    shared: Arc<Shared>,
    ctx: RequestContext,
    sink: ResponseSink,
    scanner: Option<HeaderScanner>,
}

impl RequestDriver {
    pub(crate) fn new(shared: Arc<Shared>, ctx: RequestContext, sink: ResponseSink) -> Self {
        Self {
            shared,
            ctx,
            sink,
            scanner: Some(HeaderScanner::new()),
        }
    }

    pub(crate) async fn run(mut self, spawned: SpawnedProcess, body: Body) {
        let SpawnedProcess {
            mut process,
            stdin,
            stdout,
            stderr,
        } = spawned;
        let limits = self.shared.limits;
        let deadline = process.deadline();

        let stderr_buf = StderrBuffer::new();
        let mut stderr_task = tokio::spawn(
            stderr_buf
                .clone()
                .collect(stderr, limits.max_buffer as usize),
        );
        let mut upload = tokio::spawn(pump_request_body(
            body,
            stdin,
            limits.request_chunk_size,
            limits.max_buffer,
        ));
        let mut output = OutputReader::new(stdout, limits.response_chunk_size, limits.max_buffer);

        let result = self
            .pump(&mut process, &mut upload, &mut output, deadline)
            .await;

        // stop all process I/O before anything else
        drop(output);
        upload.abort();

        match result {
            Ok(()) => {
                self.ctx.transition(RequestState::Completed);
                self.wait_after_response(&mut process, deadline).await;
                settle(&mut stderr_task).await;
                let stderr = stderr_buf.snapshot();
                if !stderr.is_empty() {
                    tracing::warn!(
                        stderr = %String::from_utf8_lossy(&stderr).trim_end(),
                        "CGI script wrote to stderr"
                    );
                }
                let status = self.sink.status().unwrap_or(StatusCode::NO_CONTENT);
                self.shared.finish(&self.ctx, status);
            }
            Err(error) => {
                self.ctx.transition(RequestState::Errored);
                if process.has_exited() {
                    settle(&mut stderr_task).await;
                }
                self.fail(&error, &stderr_buf.snapshot());
                if let Some(status) = process.stop().await {
                    tracing::debug!(pid = process.id(), %status, "CGI process stopped");
                }
            }
        }
        stderr_task.abort();
    }

    /// Move bytes until the output ends or something goes wrong.
    async fn pump(
        &mut self,
        process: &mut CgiProcess,
        upload: &mut JoinHandle<RequestBodyOutcome>,
        output: &mut OutputReader<ChildStdout>,
        deadline: Instant,
    ) -> Result<(), GatewayError> {
        let limit = self.shared.limits.max_buffer;
        let mut upload_done = false;

        loop {
            tokio::select! {
                joined = &mut *upload, if !upload_done => {
                    upload_done = true;
                    match joined {
                        Ok(RequestBodyOutcome::Complete(bytes)) => {
                            tracing::trace!(bytes, "Request body forwarded");
                        }
                        Ok(RequestBodyOutcome::TooLarge) => {
                            return Err(GatewayError::PayloadTooLarge { limit });
                        }
                        Ok(RequestBodyOutcome::ClientError) | Err(_) => {
                            return Err(GatewayError::Aborted);
                        }
                    }
                }
                chunk = output.next_chunk() => match chunk {
                    Ok(Some(chunk)) => self.forward(chunk, deadline).await?,
                    Ok(None) => return self.complete(process, deadline).await,
                    Err(OutputError::TooLarge { limit }) => {
                        return Err(GatewayError::OutputTooLarge { limit });
                    }
                    Err(OutputError::Io(e)) => {
                        return Err(GatewayError::ProcessFailure { detail: e.to_string() });
                    }
                },
                _ = sleep_until(deadline) => return Err(GatewayError::Timeout),
                _ = self.sink.closed() => return Err(GatewayError::Aborted),
            }
        }
    }

    /// Feed the header scanner, or pass a body chunk to the client.
    async fn forward(&mut self, chunk: Bytes, deadline: Instant) -> Result<(), GatewayError> {
        if let Some(scanner) = self.scanner.as_mut() {
            let Some(parsed) = scanner.push(&chunk)? else {
                return Ok(());
            };
            self.scanner = None;
            tracing::debug!(status = parsed.status.as_u16(), "CGI response head parsed");
            return self
                .sink
                .start(parsed.status, parsed.headers, parsed.body)
                .map_err(|_| GatewayError::Aborted);
        }

        tokio::select! {
            sent = self.sink.send(chunk) => sent.map_err(|_| GatewayError::Aborted),
            _ = sleep_until(deadline) => Err(GatewayError::Timeout),
        }
    }

    /// Stdout reached EOF.
    async fn complete(
        &mut self,
        process: &mut CgiProcess,
        deadline: Instant,
    ) -> Result<(), GatewayError> {
        if self.sink.started() {
            self.sink.finish();
            return Ok(());
        }

        let status = tokio::select! {
            status = process.wait() => status.map_err(|e| GatewayError::ProcessFailure {
                detail: e.to_string(),
            })?,
            _ = sleep_until(deadline) => return Err(GatewayError::Timeout),
            _ = self.sink.closed() => return Err(GatewayError::Aborted),
        };

        if !status.success() {
            return Err(GatewayError::ProcessFailure {
                detail: format!("script {}", status),
            });
        }
        if self.scanner.as_ref().is_some_and(|s| s.buffered() > 0) {
            return Err(HeaderError::MissingTerminator.into());
        }

        // no output at all
        self.sink
            .start(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new())
            .map_err(|_| GatewayError::Aborted)?;
        self.sink.finish();
        Ok(())
    }

    /// The response is out; let the child exit within the deadline.
    async fn wait_after_response(&mut self, process: &mut CgiProcess, deadline: Instant) {
        let status = tokio::select! {
            status = process.wait() => status.ok(),
            _ = sleep_until(deadline) => {
                tracing::warn!(pid = process.id(), "CGI process outlived its response, stopping");
                process.stop().await
            }
        };
        if let Some(status) = status.filter(|s| !s.success()) {
            tracing::warn!(pid = process.id(), %status, "CGI process exited with failure");
        }
    }

    fn fail(&mut self, error: &GatewayError, stderr: &[u8]) {
        match error {
            GatewayError::Aborted => tracing::debug!("Client went away, stopping CGI process"),
            GatewayError::Timeout => tracing::warn!(
                timeout_ms = self.shared.timeout.as_millis() as u64,
                response_started = self.sink.started(),
                "CGI request timed out"
            ),
            _ => tracing::warn!(
                error = %error,
                kind = error.kind(),
                response_started = self.sink.started(),
                "CGI request failed"
            ),
        }
        crate::observability::metrics::record_failure(error.kind());

        let response = self.shared.terminator.render(error, stderr);
        if let Some(status) = self.sink.fail(response) {
            self.shared.finish(&self.ctx, status);
        }
    }
}

async fn settle(task: &mut JoinHandle<()>) {
    let _ = tokio::time::timeout(STDERR_SETTLE, task).await;
}
