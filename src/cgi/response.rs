//! CGI output parsing.
//!
//! # Responsibilities
//! - Find the blank line separating script headers from the body, even when
//!   it straddles read boundaries
//! - Parse the header block into a status code and header map
//! - Hand back the first slice of body that arrived with the headers
//!
//! # Design Decisions
//! - `LF LF` and `CR LF CR LF` are both accepted; the earliest one wins
//! - `Status:` and a leading `HTTP/1.1 <code>` line both set the status
//! - Anything else that is not `Key: Value` is a hard error
//! - Default status is 200 when the script sends none

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Malformed CGI output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error(
        "HTTP Response Headers: missing end of headers line. Either the CGI script did not \
         print a blank line after its headers, or response_chunk_size is too small to hold \
         the whole header block; consider increasing it"
    )]
    MissingTerminator,

    #[error("HTTP Response Headers: invalid or not supported header line: {0}")]
    UnsupportedLine(String),
}

/// Status, headers and the body bytes that followed the separator.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Position and length of the first header/body separator at or after `from`.
pub fn find_separator(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Split complete output into header block and body.
pub fn split_output(output: &[u8]) -> Option<(&[u8], &[u8])> {
    let (index, len) = find_separator(output, 0)?;
    Some((&output[..index], &output[index + len..]))
}

/// Parse a whole buffered output at once.
pub fn parse_response(output: &[u8]) -> Result<ParsedResponse, HeaderError> {
    let (head, body) = split_output(output).ok_or(HeaderError::MissingTerminator)?;
    let (status, headers) = parse_headers(head)?;
    Ok(ParsedResponse {
        status,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

/// Parse a header block (without its terminating blank line).
pub fn parse_headers(block: &[u8]) -> Result<(StatusCode, HeaderMap), HeaderError> {
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::new();

    for raw in block.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if is_status_line(line) {
            status = line
                .split_whitespace()
                .nth(1)
                .and_then(parse_status)
                .ok_or_else(|| HeaderError::UnsupportedLine(line.to_string()))?;
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(HeaderError::UnsupportedLine(line.to_string()));
        };
        let key = key.trim();
        let value = value.trim();

        if key.eq_ignore_ascii_case("status") {
            status = value
                .split_whitespace()
                .next()
                .and_then(parse_status)
                .ok_or_else(|| HeaderError::UnsupportedLine(line.to_string()))?;
            continue;
        }

        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| HeaderError::UnsupportedLine(line.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| HeaderError::UnsupportedLine(line.to_string()))?;
        headers.append(name, value);
    }

    Ok((status, headers))
}

fn is_status_line(line: &str) -> bool {
    line.get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/1.1"))
}

fn parse_status(code: &str) -> Option<StatusCode> {
    code.parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
}

/// Incremental separator search over the accumulated prefix of the output.
///
/// Nothing is released until the separator has been seen; the bytes after it
/// in the same push become the first body slice.
#[derive(Debug, Default)]
pub struct HeaderScanner {
    buf: BytesMut,
    scanned: usize,
}

impl HeaderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk. Returns the parsed head once the separator shows up.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<ParsedResponse>, HeaderError> {
        self.buf.extend_from_slice(chunk);

        // the separator may begin up to three bytes before the new data
        let from = self.scanned.saturating_sub(3);
        let Some((index, len)) = find_separator(&self.buf, from) else {
            self.scanned = self.buf.len();
            return Ok(None);
        };

        let head = self.buf.split_to(index);
        let _separator = self.buf.split_to(len);
        let body = std::mem::take(&mut self.buf).freeze();
        self.scanned = 0;

        let (status, headers) = parse_headers(&head)?;
        Ok(Some(ParsedResponse {
            status,
            headers,
            body,
        }))
    }

    /// Bytes held back while waiting for the separator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
