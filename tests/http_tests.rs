//! Integration coverage for [`zaver::parser`]: construct a buffer
//! incrementally, re-parse after each chunk, and assert the
//! `Again`/`Done`/error contract against the GET-only
//! request-line-plus-headers grammar.

use zaver::parser::{parse_header_line, parse_request_line, HeaderLine, Method};

#[test]
fn request_line_is_none_until_a_full_line_arrives() {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"GET /path ");
    assert!(parse_request_line(&buf).unwrap().is_none());

    buf.extend_from_slice(b"HTTP/1.1\r\n");
    let rl = parse_request_line(&buf).unwrap().unwrap();
    assert!(rl.method.is_get());
    assert_eq!(rl.uri, "/path");
    assert_eq!((rl.http_major, rl.http_minor), (1, 1));
}

#[test]
fn fragmented_header_block_is_parsed_line_by_line() {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"GET / HTTP/1.1\r\n");
    let rl = parse_request_line(&buf).unwrap().unwrap();
    let mut pos = rl.consumed;

    buf.extend_from_slice(b"User-Agent: te");
    assert!(parse_header_line(&buf[pos..]).unwrap().is_none());

    buf.extend_from_slice(b"st\r\n");
    match parse_header_line(&buf[pos..]).unwrap().unwrap() {
        HeaderLine::Field { key, value, consumed } => {
            assert_eq!(key, "User-Agent");
            assert_eq!(value, "test");
            pos += consumed;
        }
        _ => panic!("expected a field line"),
    }

    buf.extend_from_slice(b"\r\n");
    match parse_header_line(&buf[pos..]).unwrap().unwrap() {
        HeaderLine::Blank { .. } => {}
        _ => panic!("expected the blank terminator line"),
    }
}

#[test]
fn non_get_method_is_recognized_but_not_get() {
    let rl = parse_request_line(b"POST /upload HTTP/1.1\r\n").unwrap().unwrap();
    assert!(!rl.method.is_get());
    assert_eq!(rl.method, Method::Other("POST".to_string()));
}

#[test]
fn malformed_request_line_is_an_error_not_a_retry() {
    assert!(parse_request_line(b"GET /\r\n").is_err());
    assert!(parse_request_line(b"GARBAGE\r\n").is_err());
}

#[test]
fn header_line_without_a_colon_is_an_error() {
    assert!(parse_header_line(b"not-a-header-line\r\n").is_err());
}
