//! Response wire-format construction: status lines, the static MIME table,
//! and the tiny HTML error body.
//!
//! Headers are built into a `Vec<u8>` with `write!` rather than raw
//! buffer-offset arithmetic.

use std::io::Write as _;
use std::time::SystemTime;

/// Extension-keyed MIME table. Unknown extensions fall back to
/// `text/plain`.
const MIME_TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("xml", "text/xml"),
    ("xhtml", "application/xhtml+xml"),
    ("txt", "text/plain"),
    ("rtf", "application/rtf"),
    ("pdf", "application/pdf"),
    ("word", "application/msword"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("au", "audio/basic"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("avi", "video/x-msvideo"),
    ("gz", "application/x-gzip"),
    ("tar", "application/x-tar"),
    ("css", "text/css"),
];

pub fn mime_for_path(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("text/plain")
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// RFC-1123 GMT timestamp, as used by both `Last-Modified` and
/// `If-Modified-Since` comparison.
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Parameters shared by every header block this module builds; not every
/// response uses every field (a 304 has no content type/length, an error
/// response has no `Last-Modified`).
pub struct HeaderParams<'a> {
    pub status: u16,
    pub keep_alive: bool,
    pub keep_alive_timeout_secs: u64,
    pub content_type: Option<&'a str>,
    pub content_length: Option<u64>,
    pub last_modified: Option<SystemTime>,
}

/// Builds a header block ending in a blank line (`\r\n\r\n`), with
/// fields in a fixed, consistent order.
pub fn build_headers(params: &HeaderParams) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    let _ = write!(
        out,
        "HTTP/1.1 {} {}\r\n",
        params.status,
        status_text(params.status)
    );
    if params.keep_alive {
        let _ = write!(out, "Connection: keep-alive\r\n");
        let _ = write!(
            out,
            "Keep-Alive: timeout={}\r\n",
            params.keep_alive_timeout_secs
        );
    } else {
        let _ = write!(out, "Connection: close\r\n");
    }
    if let Some(ct) = params.content_type {
        let _ = write!(out, "Content-type: {ct}\r\n");
    }
    if let Some(len) = params.content_length {
        let _ = write!(out, "Content-length: {len}\r\n");
    }
    if let Some(modified) = params.last_modified {
        let _ = write!(out, "Last-Modified: {}\r\n", http_date(modified));
    }
    let _ = write!(out, "Server: Zaver\r\n\r\n");
    out
}

/// The tiny HTML body sent with every error response, status interpolated
/// into both the title and a one-line summary.
pub fn error_body(status: u16) -> Vec<u8> {
    format!(
        "<html><title>Zaver Error</title><body bgcolor=\"#cc9999\">\
         <h4>Zaver Error</h4>\
         {status}: {text}\
         <hr><em>Zaver web server</em></body></html>",
        text = status_text(status)
    )
    .into_bytes()
}

/// A full error response: header block plus body, ready to hand to
/// `try_send`.
pub fn build_error(status: u16, keep_alive: bool, keep_alive_timeout_secs: u64) -> (Vec<u8>, Vec<u8>) {
    let body = error_body(status);
    let headers = build_headers(&HeaderParams {
        status,
        keep_alive,
        keep_alive_timeout_secs,
        content_type: Some("text/html"),
        content_length: Some(body.len() as u64),
        last_modified: None,
    });
    (headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn mime_lookup_matches_known_extensions() {
        assert_eq!(mime_for_path(Path::new("a/b.html")), "text/html");
        assert_eq!(mime_for_path(Path::new("a/b.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a/b.jpeg")), "image/jpeg");
    }

    #[test]
    fn mime_lookup_defaults_to_text_plain() {
        assert_eq!(mime_for_path(Path::new("a/b.unknown")), "text/plain");
        assert_eq!(mime_for_path(Path::new("a/b")), "text/plain");
    }

    #[test]
    fn header_block_ends_with_blank_line() {
        let headers = build_headers(&HeaderParams {
            status: 200,
            keep_alive: true,
            keep_alive_timeout_secs: 5,
            content_type: Some("text/html"),
            content_length: Some(10),
            last_modified: None,
        });
        assert!(headers.ends_with(b"\r\n\r\n"));
        let text = String::from_utf8(headers).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Keep-Alive: timeout=5\r\n"));
    }

    #[test]
    fn close_response_omits_keep_alive_header() {
        let headers = build_headers(&HeaderParams {
            status: 404,
            keep_alive: false,
            keep_alive_timeout_secs: 5,
            content_type: Some("text/html"),
            content_length: Some(0),
            last_modified: None,
        });
        let text = String::from_utf8(headers).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Keep-Alive"));
    }

    #[test]
    fn error_body_interpolates_status() {
        let body = String::from_utf8(error_body(404)).unwrap();
        assert!(body.contains("404: Not Found"));
    }

    #[test]
    fn build_error_sets_matching_content_length() {
        let (headers, body) = build_error(500, false, 5);
        let text = String::from_utf8(headers).unwrap();
        assert!(text.contains(&format!("Content-length: {}\r\n", body.len())));
    }
}
