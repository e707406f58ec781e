//! Request parsing, Range parsing, and response framing.
//!
//! Headers are matched by field name after splitting on CRLF, not by
//! scanning for `Range:`/`Connection:` as a raw substring anywhere in
//! the buffer — a raw scan can false-match a token embedded inside an
//! unrelated header's value.

use std::path::{Component, Path, PathBuf};

pub const MAX_METHOD_LEN: usize = 16;
pub const MAX_PATH_LEN: usize = 512;
pub const MAX_VERSION_LEN: usize = 16;
pub const MAX_REQUEST_BUFFER: usize = 8 * 1024;
pub const MAX_HEADER_BUFFER: usize = 2 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
}

/// Parses the first request line: three whitespace-separated tokens,
/// each length-bounded.
pub fn parse_request_line(line: &str) -> Option<HttpRequest> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if method.is_empty()
        || path.is_empty()
        || version.is_empty()
        || method.len() > MAX_METHOD_LEN
        || path.len() > MAX_PATH_LEN
        || version.len() > MAX_VERSION_LEN
    {
        return None;
    }
    Some(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct ParsedHeaders {
    pub connection: Option<String>,
    pub range: Option<String>,
}

/// Scans header lines (already split on CRLF by the caller) for
/// `Connection` and `Range`, matched by field name rather than raw
/// substring.
pub fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> ParsedHeaders {
    let mut headers = ParsedHeaders::default();
    for line in lines {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "connection" => headers.connection = Some(value),
            "range" => headers.range = Some(value),
            _ => {}
        }
    }
    headers
}

/// Whether the connection stays open after this response: an explicit
/// `Connection` header wins, else the HTTP version default.
pub fn keep_alive(connection_header: Option<&str>, version: &str) -> bool {
    if let Some(value) = connection_header {
        let lower = value.to_ascii_lowercase();
        if lower.contains("close") {
            return false;
        }
        if lower.contains("keep-alive") {
            return true;
        }
    }
    version == "HTTP/1.1"
}

/// Resolves a request path against the document root. Rejects any
/// path containing `..`.
pub fn resolve_path(document_root: &Path, request_path: &str) -> Option<PathBuf> {
    if request_path.contains("..") {
        return None;
    }
    // Strip a query string if present; the data model only parses the
    // raw request-URI, not query parameters.
    let request_path = request_path.split('?').next().unwrap_or(request_path);
    let trimmed = request_path.strip_prefix('/').unwrap_or(request_path);
    let subpath = if trimmed.is_empty() { "index.html" } else { trimmed };

    let candidate = Path::new(subpath);
    // Defense in depth: reject absolute/root/parent components even if
    // ".." wasn't literally present as a substring (e.g. a leading "/"
    // after normalization tricks). `CurDir` (a bare "." component, as in
    // "/./index.html") is not a traversal and is left to join normally.
    if candidate
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir))
    {
        return None;
    }

    Some(document_root.join(candidate))
}

/// An inclusive byte range after resolution against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
}

impl RangeSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses `bytes=S-E`, `bytes=S-`, or `bytes=-N` against `file_size`.
/// Any grammar or bounds violation is `None` (caller responds 416).
pub fn parse_range(value: &str, file_size: u64) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?;
    // Single range only: reject a comma-separated list.
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;

    if start_str.is_empty() {
        // Suffix form: bytes=-N
        let n: u64 = end_str.parse().ok()?;
        if n == 0 || n > file_size {
            return None;
        }
        return Some(RangeSpec {
            start: file_size - n,
            end: file_size - 1,
        });
    }

    let start: u64 = start_str.parse().ok()?;
    if end_str.is_empty() {
        // Open-ended: bytes=S-
        if file_size == 0 || start >= file_size {
            return None;
        }
        return Some(RangeSpec {
            start,
            end: file_size - 1,
        });
    }

    // Closed: bytes=S-E
    let end: u64 = end_str.parse().ok()?;
    if start > end || file_size == 0 || start >= file_size {
        return None;
    }
    let end = end.min(file_size - 1);
    Some(RangeSpec { start, end })
}

/// Builds the status-line + header block for a response.
/// `content_range` is set only for 206 responses.
pub fn build_response_headers(
    status: u16,
    reason: &str,
    content_type: &str,
    content_length: u64,
    connection_keep_alive: bool,
    content_range: Option<(u64, u64, u64)>,
) -> Vec<u8> {
    let mut headers = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Accept-Ranges: bytes\r\n\
         Server: corehttpd/1.0\r\n\
         Connection: {}\r\n",
        if connection_keep_alive { "keep-alive" } else { "close" }
    );
    if let Some((start, end, total)) = content_range {
        headers.push_str(&format!("Content-Range: bytes {start}-{end}/{total}\r\n"));
    }
    headers.push_str("\r\n");
    debug_assert!(
        headers.len() <= MAX_HEADER_BUFFER,
        "response header block grew past the {MAX_HEADER_BUFFER}-byte budget"
    );
    headers.into_bytes()
}

pub fn error_body_html(status: u16, reason: &str) -> Vec<u8> {
    format!("<h1>{status} {reason}</h1>").into_bytes()
}
