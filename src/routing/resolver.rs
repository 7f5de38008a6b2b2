//! URL to script path resolution.
//!
//! # Responsibilities
//! - Split a request path into the script path and its PATH_INFO tail
//! - Append the index script for directory URLs
//! - Match the gateway's base prefix (case-insensitive)
//! - Decode and sanitize the remainder into a safe relative path
//!
//! # Design Decisions
//! - A URL outside the prefix is a pass-through signal (`None`), never an error
//! - The sanitizer is idempotent and its output is always relative
//! - Dot segments are resolved by the URL parser before any matching happens

use percent_encoding::percent_decode_str;
use url::Url;

/// Base used to parse origin-form request targets ("/cgi-bin/x?y").
const DEFAULT_URL_BASE: &str = "http://example.com";

/// Maps request URLs to script paths relative to the gateway's base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_path: String,
    index_extension: String,
}

impl PathResolver {
    pub fn new(url_path: &str, index_extension: &str) -> Self {
        Self {
            base_path: normalize_base(url_path),
            index_extension: index_extension.trim_start_matches('.').to_string(),
        }
    }

    /// The normalized base prefix ("/cgi-bin").
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Resolve a request URL to a sanitized relative script path.
    ///
    /// Returns `None` when the URL does not belong to the gateway. A returned
    /// empty string means the URL is ours but names no file.
    pub fn resolve(&self, url: &str) -> Option<String> {
        let pathname = request_pathname(url)?;
        let (script, _) = split_script_path(&pathname);

        let mut file_path = collapse_runs(script, '/');
        if extension_of(&file_path).is_none() {
            file_path = format!("{}/index.{}", file_path, self.index_extension);
            file_path = collapse_runs(&file_path, '/');
        }

        let rest = strip_prefix_ignore_case(&file_path, &self.base_path)?;
        let rest = rest.trim_start_matches('/');
        let decoded = percent_decode_str(rest).decode_utf8_lossy();

        Some(sanitize_path(&decoded))
    }
}

/// Trailing and duplicate slashes removed; "/" becomes the empty prefix.
fn normalize_base(url_path: &str) -> String {
    collapse_runs(url_path, '/').trim_end_matches('/').to_string()
}

/// Parse a request target and return its normalized path component.
pub fn request_pathname(url: &str) -> Option<String> {
    let base = Url::parse(DEFAULT_URL_BASE).ok()?;
    let parsed = base.join(url).ok()?;
    Some(parsed.path().to_string())
}

/// Query component of a request target, without the leading '?'.
pub fn request_query(url: &str) -> String {
    Url::parse(DEFAULT_URL_BASE)
        .ok()
        .and_then(|base| base.join(url).ok())
        .and_then(|parsed| parsed.query().map(str::to_string))
        .unwrap_or_default()
}

/// Split a path at the first slash that follows a dotted extension.
///
/// `"/cgi-bin/a/script.cgi/path/info"` → `("/cgi-bin/a/script.cgi", Some("/path/info"))`.
pub fn split_script_path(pathname: &str) -> (&str, Option<&str>) {
    let bytes = pathname.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'/' || i == 0 {
            continue;
        }
        let mut j = i;
        while j > 0 && bytes[j - 1].is_ascii_alphabetic() {
            j -= 1;
        }
        if j < i && j > 0 && bytes[j - 1] == b'.' {
            return (&pathname[..i], Some(&pathname[i..]));
        }
    }
    (pathname, None)
}

/// PATH_INFO for a request path, with duplicate slashes collapsed.
pub fn path_info(pathname: &str) -> Option<String> {
    split_script_path(pathname)
        .1
        .map(|tail| collapse_runs(tail, '/'))
}

/// Extension of the last path segment, ignoring leading-dot names.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Remove traversal sequences, control bytes, duplicate separators and any
/// absolute-path prefix. The result is relative and `sanitize_path` is
/// idempotent on it.
pub fn sanitize_path(path: &str) -> String {
    let cleaned: String = path.chars().filter(|c| !c.is_ascii_control()).collect();
    let cleaned = cleaned.replace("..", "");
    let cleaned = collapse_runs(&collapse_runs(&cleaned, '/'), '\\');

    let mut rest = cleaned.as_str();
    loop {
        let trimmed = rest.trim_start_matches(['/', '\\']);
        let trimmed = strip_drive_prefix(trimmed).unwrap_or(trimmed);
        if trimmed.len() == rest.len() {
            break;
        }
        rest = trimmed;
    }
    rest.to_string()
}

/// "C:\..." or "c:/..." → the part after the separator.
fn strip_drive_prefix(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
    {
        Some(&path[3..])
    } else {
        None
    }
}

fn collapse_runs(s: &str, sep: char) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_sep = false;
    for c in s.chars() {
        if c == sep {
            if !prev_sep {
                out.push(c);
            }
            prev_sep = true;
        } else {
            out.push(c);
            prev_sep = false;
        }
    }
    out
}

/// Case-insensitive prefix match on a path-segment boundary.
fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
