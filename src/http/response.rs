//! Response construction for script output.
//!
//! # Responsibilities
//! - Turn a parsed CGI head plus a chunk channel into an HTTP response
//! - Strip hop-by-hop headers a script may have printed
//!
//! # Design Decisions
//! - Streaming responses avoid buffering the entire body
//! - An `Err` item on the channel makes hyper abort the connection, which is
//!   the only way to signal failure once the head is on the wire

use std::io;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Response, StatusCode};
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;

/// Items carried from the request driver to the response body.
pub type BodyChunk = Result<Bytes, io::Error>;

/// Headers that describe the connection, not the message.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Build a response whose body is fed from `rx`.
pub fn streaming_response(
    status: StatusCode,
    mut headers: HeaderMap,
    rx: mpsc::Receiver<BodyChunk>,
) -> Response<Body> {
    strip_hop_by_hop(&mut headers);

    let body = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
