//! Request-line and header tokenizer.
//!
//! Covers a request line plus a run of `Key: value` header lines; no
//! body grammar and no chunked framing, since request bodies aren't
//! supported and CGI is GET-only. The parser works over an external
//! buffer with a fixed set of states and an `Again`/`Done`/error
//! contract, recognizing a single-space-separated request line,
//! `:`-split headers, and a blank-line terminator.

use crate::error::{Result, ZaverError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Other(String),
}

impl Method {
    pub fn is_get(&self) -> bool {
        matches!(self, Method::Get)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    RequestLine,
    Headers,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseProgress {
    Again,
    Done,
}

pub struct RequestLine {
    pub method: Method,
    pub uri: String,
    pub http_major: u8,
    pub http_minor: u8,
    pub consumed: usize,
}

/// `None` means the buffer doesn't yet hold a full line (wait for more
/// data); an `Err` means what's there can never become a valid request
/// line.
pub fn parse_request_line(buf: &[u8]) -> Result<Option<RequestLine>> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[..line_end])
        .map_err(|_| ZaverError::BadRequest("non-UTF-8 request line".into()))?;

    let mut parts = text.splitn(3, ' ');
    let (method_s, uri, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v)) if !m.is_empty() && !u.is_empty() => (m, u, v),
        _ => return Err(ZaverError::BadRequest("malformed request line".into())),
    };

    let (http_major, http_minor) = parse_version(version)?;
    let method = if method_s == "GET" {
        Method::Get
    } else {
        Method::Other(method_s.to_string())
    };

    Ok(Some(RequestLine {
        method,
        uri: uri.to_string(),
        http_major,
        http_minor,
        consumed: line_end + 2,
    }))
}

fn parse_version(v: &str) -> Result<(u8, u8)> {
    let rest = v
        .strip_prefix("HTTP/")
        .ok_or_else(|| ZaverError::BadRequest("bad HTTP version".into()))?;
    let (maj, min) = rest
        .split_once('.')
        .ok_or_else(|| ZaverError::BadRequest("bad HTTP version".into()))?;
    let maj: u8 = maj
        .parse()
        .map_err(|_| ZaverError::BadRequest("bad HTTP version".into()))?;
    let min: u8 = min
        .parse()
        .map_err(|_| ZaverError::BadRequest("bad HTTP version".into()))?;
    Ok((maj, min))
}

pub enum HeaderLine {
    Field {
        key: String,
        value: String,
        consumed: usize,
    },
    Blank {
        consumed: usize,
    },
}

pub fn parse_header_line(buf: &[u8]) -> Result<Option<HeaderLine>> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    if line_end == 0 {
        return Ok(Some(HeaderLine::Blank { consumed: 2 }));
    }
    let text = std::str::from_utf8(&buf[..line_end])
        .map_err(|_| ZaverError::BadRequest("non-UTF-8 header line".into()))?;
    let (key, value) = text
        .split_once(':')
        .ok_or_else(|| ZaverError::BadRequest("malformed header line".into()))?;
    Ok(Some(HeaderLine::Field {
        key: key.trim().to_string(),
        value: value.trim().to_string(),
        consumed: line_end + 2,
    }))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_waits_for_full_line() {
        assert!(parse_request_line(b"GET / HTTP/1.1").unwrap().is_none());
    }

    #[test]
    fn request_line_parses_method_uri_version() {
        let rl = parse_request_line(b"GET /a/b?q=1 HTTP/1.1\r\nHost:").unwrap().unwrap();
        assert!(rl.method.is_get());
        assert_eq!(rl.uri, "/a/b?q=1");
        assert_eq!((rl.http_major, rl.http_minor), (1, 1));
        assert_eq!(rl.consumed, "GET /a/b?q=1 HTTP/1.1\r\n".len());
    }

    #[test]
    fn request_line_rejects_missing_version() {
        assert!(parse_request_line(b"GET /\r\n").is_err());
    }

    #[test]
    fn request_line_accepts_non_get_method() {
        let rl = parse_request_line(b"POST / HTTP/1.0\r\n").unwrap().unwrap();
        assert!(!rl.method.is_get());
    }

    #[test]
    fn header_line_splits_key_and_value() {
        match parse_header_line(b"Host:  example.com  \r\n").unwrap().unwrap() {
            HeaderLine::Field { key, value, .. } => {
                assert_eq!(key, "Host");
                assert_eq!(value, "example.com");
            }
            _ => panic!("expected field"),
        }
    }

    #[test]
    fn blank_header_line_signals_end_of_headers() {
        match parse_header_line(b"\r\nGET").unwrap().unwrap() {
            HeaderLine::Blank { consumed } => assert_eq!(consumed, 2),
            _ => panic!("expected blank"),
        }
    }

    #[test]
    fn header_line_without_colon_errors() {
        assert!(parse_header_line(b"garbage\r\n").is_err());
    }

    #[test]
    fn header_line_waits_for_more_data() {
        assert!(parse_header_line(b"Host: exam").unwrap().is_none());
    }
}
