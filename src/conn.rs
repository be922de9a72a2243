//! The per-connection state machine: read/parse, static-file and CGI
//! dispatch, response staging and the vectored/file write path, and
//! connection teardown.
//!
//! `Connection` is a single struct owning the socket, a fixed receive
//! buffer, parse cursor, and output staging fields, with free functions
//! operating on it rather than a god object's worth of methods. The
//! read-parse-dispatch-write sequencing supports keep-alive pipelining,
//! and an error response goes through the same send path as a normal
//! one rather than a separate code path.

use std::fs::File;
use std::io::{self, IoSlice, Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::SystemTime;

use mio::Token;

use crate::config::AppConfig;
use crate::parser::{self, Method, ParsePhase, ParseProgress};
use crate::pathmap;
use crate::response;

/// Fixed-size receive buffer. Request lines and header blocks must fit
/// within it; anything that doesn't is an internal overflow (§7: 500
/// then close), not a retry-with-more-memory condition.
pub const RECV_BUF_CAP: usize = 8192;
const FILE_CHUNK: usize = 8192;

pub struct Connection {
    pub stream: Option<mio::net::TcpStream>,

    pub buf: Vec<u8>,
    pub last: usize,
    pub parse_pos: usize,
    pub phase: ParsePhase,

    pub method: Method,
    pub uri: String,
    pub http_major: u8,
    pub http_minor: u8,
    pub headers: Vec<(String, String)>,

    pub keep_alive: bool,
    pub if_modified_since: Option<SystemTime>,

    pub out_header: Vec<u8>,
    pub out_header_sent: usize,
    pub out_body: Option<Vec<u8>>,
    pub out_body_sent: usize,
    pub out_file: Option<File>,
    pub out_file_offset: u64,
    pub out_file_size: u64,
    out_file_chunk: Vec<u8>,
    out_file_chunk_sent: usize,
    pub writing: bool,

    pub cgi: Option<crate::cgi::CgiState>,

    pub timer_seq: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    KeepAlive,
    Request,
}

pub enum NextStep {
    ArmRead(TimeoutKind),
    ArmWrite(TimeoutKind),
    /// A CGI script was just started; the worker registers its stdout
    /// fd with the multiplexer and arms the request timeout.
    CgiStarted,
    /// Re-arm the CGI stdout fd for another read; arm the request
    /// timeout on the connection.
    CgiAwaitMore,
    /// The script reached EOF without ever producing output; nothing to
    /// write yet, just keep the request timeout ticking.
    CgiIdle,
    Close,
}

pub struct RequestCtx<'a> {
    pub docroot: &'a Path,
    pub config: &'a AppConfig,
}

enum DispatchOutcome {
    Handled,
    Cgi,
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            stream: None,
            buf: vec![0u8; RECV_BUF_CAP],
            last: 0,
            parse_pos: 0,
            phase: ParsePhase::RequestLine,
            method: Method::Get,
            uri: String::new(),
            http_major: 1,
            http_minor: 1,
            headers: Vec::new(),
            keep_alive: false,
            if_modified_since: None,
            out_header: Vec::new(),
            out_header_sent: 0,
            out_body: None,
            out_body_sent: 0,
            out_file: None,
            out_file_offset: 0,
            out_file_size: 0,
            out_file_chunk: Vec::new(),
            out_file_chunk_sent: 0,
            writing: false,
            cgi: None,
            timer_seq: None,
        }
    }

    pub fn accept_stream(&mut self, stream: mio::net::TcpStream) {
        self.stream = Some(stream);
    }

    pub fn token(&self) -> Option<Token> {
        self.stream.as_ref().map(|s| Token(s.as_raw_fd() as usize))
    }

    /// Full teardown for returning to [`crate::pool::ConnPool`]. Headers
    /// are left for the caller to drain into the header pool first (see
    /// `DeferredRelease::flush`).
    pub fn reset(&mut self) {
        self.stream = None;
        self.last = 0;
        self.parse_pos = 0;
        self.phase = ParsePhase::RequestLine;
        self.method = Method::Get;
        self.uri.clear();
        self.http_major = 1;
        self.http_minor = 1;
        self.headers.clear();
        self.keep_alive = false;
        self.if_modified_since = None;
        reset_output(self);
        self.cgi = None;
        self.timer_seq = None;
    }

    /// Slides any unparsed pipelined bytes down to the front of the
    /// buffer and resets per-request parse state, without touching the
    /// socket or the output staging fields.
    fn compact_and_reset_for_next_request(&mut self) {
        let remaining = self.last - self.parse_pos;
        if remaining > 0 {
            self.buf.copy_within(self.parse_pos..self.last, 0);
        }
        self.last = remaining;
        self.parse_pos = 0;
        self.phase = ParsePhase::RequestLine;
        self.method = Method::Get;
        self.uri.clear();
        self.headers.clear();
        self.if_modified_since = None;
    }

    fn advance_parse(&mut self) -> crate::error::Result<ParseProgress> {
        loop {
            match self.phase {
                ParsePhase::RequestLine => match parser::parse_request_line(&self.buf[self.parse_pos..self.last])? {
                    None => return Ok(ParseProgress::Again),
                    Some(rl) => {
                        self.method = rl.method;
                        self.uri = rl.uri;
                        self.http_major = rl.http_major;
                        self.http_minor = rl.http_minor;
                        self.parse_pos += rl.consumed;
                        self.phase = ParsePhase::Headers;
                    }
                },
                ParsePhase::Headers => match parser::parse_header_line(&self.buf[self.parse_pos..self.last])? {
                    None => return Ok(ParseProgress::Again),
                    Some(parser::HeaderLine::Blank { consumed }) => {
                        self.parse_pos += consumed;
                        self.phase = ParsePhase::Done;
                        return Ok(ParseProgress::Done);
                    }
                    Some(parser::HeaderLine::Field { key, value, consumed }) => {
                        self.parse_pos += consumed;
                        self.headers.push((key, value));
                    }
                },
                ParsePhase::Done => return Ok(ParseProgress::Done),
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

fn reset_output(conn: &mut Connection) {
    conn.writing = false;
    conn.out_header.clear();
    conn.out_header_sent = 0;
    conn.out_body = None;
    conn.out_body_sent = 0;
    conn.out_file = None;
    conn.out_file_offset = 0;
    conn.out_file_size = 0;
    conn.out_file_chunk.clear();
    conn.out_file_chunk_sent = 0;
}

enum FillResult {
    Progressed,
    WouldBlock,
    Eof,
    Overflow,
}

fn fill_buffer(conn: &mut Connection) -> FillResult {
    if conn.last >= conn.buf.len().saturating_sub(1) {
        return FillResult::Overflow;
    }
    let Some(stream) = conn.stream.as_mut() else {
        return FillResult::Eof;
    };
    match stream.read(&mut conn.buf[conn.last..]) {
        Ok(0) => FillResult::Eof,
        Ok(n) => {
            conn.last += n;
            FillResult::Progressed
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => FillResult::WouldBlock,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => FillResult::Progressed,
        Err(_) => FillResult::Eof,
    }
}

fn keep_alive_timeout_secs(ms: u64) -> u64 {
    if ms == 0 {
        0
    } else {
        ms.div_ceil(1000).max(1)
    }
}

fn same_second(a: SystemTime, b: SystemTime) -> bool {
    let ea = a.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs());
    let eb = b.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs());
    matches!((ea, eb), (Ok(x), Ok(y)) if x == y)
}

fn readable_by_owner(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o400 != 0
}

fn executable_by_owner(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o100 != 0
}

/// Default to request-header-driven keep-alive, then apply any explicit
/// `Connection` header override; parses `If-Modified-Since` if present.
fn process_headers(conn: &mut Connection) {
    conn.keep_alive = conn.http_major > 1 || (conn.http_major == 1 && conn.http_minor >= 1);
    conn.if_modified_since = None;
    for (k, v) in &conn.headers {
        if k.eq_ignore_ascii_case("connection") {
            if v.eq_ignore_ascii_case("keep-alive") {
                conn.keep_alive = true;
            } else if v.eq_ignore_ascii_case("close") {
                conn.keep_alive = false;
            }
        } else if k.eq_ignore_ascii_case("if-modified-since") {
            conn.if_modified_since = httpdate::parse_http_date(v).ok();
        }
    }
}

fn stage_error(conn: &mut Connection, status: u16, keep_alive: bool, config: &AppConfig) {
    reset_output(conn);
    conn.keep_alive = keep_alive;
    let (headers, body) = response::build_error(status, keep_alive, keep_alive_timeout_secs(config.keep_alive_timeout_ms));
    conn.out_header = headers;
    conn.out_body = Some(body);
}

fn stage_304(conn: &mut Connection, config: &AppConfig) {
    reset_output(conn);
    conn.out_header = response::build_headers(&response::HeaderParams {
        status: 304,
        keep_alive: conn.keep_alive,
        keep_alive_timeout_secs: keep_alive_timeout_secs(config.keep_alive_timeout_ms),
        content_type: None,
        content_length: None,
        last_modified: None,
    });
}

fn stage_200(conn: &mut Connection, config: &AppConfig, path: &Path, len: u64, mtime: SystemTime) {
    match File::open(path) {
        Ok(file) => {
            reset_output(conn);
            conn.out_header = response::build_headers(&response::HeaderParams {
                status: 200,
                keep_alive: conn.keep_alive,
                keep_alive_timeout_secs: keep_alive_timeout_secs(config.keep_alive_timeout_ms),
                content_type: Some(response::mime_for_path(path)),
                content_length: Some(len),
                last_modified: Some(mtime),
            });
            conn.out_file = Some(file);
            conn.out_file_size = len;
        }
        Err(_) => stage_error(conn, 404, conn.keep_alive, config),
    }
}

fn handle_static_dispatch(conn: &mut Connection, ctx: &RequestCtx) -> DispatchOutcome {
    match pathmap::map_uri(&conn.uri, ctx.docroot, true) {
        Err(e) => stage_error(conn, e.status_code(), false, ctx.config),
        Ok(mapped) => match std::fs::metadata(&mapped.disk_path) {
            Err(_) => stage_error(conn, 404, conn.keep_alive, ctx.config),
            Ok(meta) => {
                if !meta.is_file() || !readable_by_owner(&meta) {
                    stage_error(conn, 403, conn.keep_alive, ctx.config);
                } else {
                    let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                    let not_modified = conn
                        .if_modified_since
                        .map(|ims| same_second(ims, mtime))
                        .unwrap_or(false);
                    if not_modified {
                        stage_304(conn, ctx.config);
                    } else {
                        stage_200(conn, ctx.config, &mapped.disk_path, meta.len(), mtime);
                    }
                }
            }
        },
    }
    DispatchOutcome::Handled
}

fn handle_cgi_dispatch(conn: &mut Connection, ctx: &RequestCtx, raw_path: &str) -> DispatchOutcome {
    if !conn.method.is_get() {
        stage_error(conn, 405, false, ctx.config);
        return DispatchOutcome::Handled;
    }

    let mapped = match pathmap::map_uri(&conn.uri, ctx.docroot, false) {
        Ok(m) => m,
        Err(e) => {
            stage_error(conn, e.status_code(), false, ctx.config);
            return DispatchOutcome::Handled;
        }
    };

    let executable = std::fs::metadata(&mapped.disk_path)
        .map(|m| executable_by_owner(&m))
        .unwrap_or(false);
    if !executable {
        stage_error(conn, 404, false, ctx.config);
        return DispatchOutcome::Handled;
    }

    match crate::cgi::start(&mapped.disk_path, raw_path, &mapped.query_string) {
        Ok(state) => {
            conn.cgi = Some(state);
            conn.keep_alive = false;
            DispatchOutcome::Cgi
        }
        Err(_) => {
            stage_error(conn, 500, false, ctx.config);
            DispatchOutcome::Handled
        }
    }
}

fn dispatch(conn: &mut Connection, ctx: &RequestCtx) -> DispatchOutcome {
    let path_only = conn.uri.split('?').next().unwrap_or("").to_string();
    if path_only.starts_with("/cgi-bin/") {
        handle_cgi_dispatch(conn, ctx, &path_only)
    } else {
        handle_static_dispatch(conn, ctx)
    }
}

enum SendResult {
    Done,
    WouldBlock,
    Error,
}

fn try_send(conn: &mut Connection) -> SendResult {
    let Some(stream) = conn.stream.as_mut() else {
        return SendResult::Error;
    };

    loop {
        let hdr_remaining = conn.out_header.len() - conn.out_header_sent;
        let body_remaining = conn.out_body.as_ref().map(|b| b.len() - conn.out_body_sent).unwrap_or(0);
        if hdr_remaining == 0 && body_remaining == 0 {
            break;
        }

        let mut slices: Vec<IoSlice> = Vec::with_capacity(2);
        if hdr_remaining > 0 {
            slices.push(IoSlice::new(&conn.out_header[conn.out_header_sent..]));
        }
        if let Some(body) = conn.out_body.as_ref() {
            if body_remaining > 0 {
                slices.push(IoSlice::new(&body[conn.out_body_sent..]));
            }
        }

        match stream.write_vectored(&slices) {
            Ok(0) => return SendResult::Error,
            Ok(mut n) => {
                drop(slices);
                if hdr_remaining > 0 {
                    let consumed = n.min(hdr_remaining);
                    conn.out_header_sent += consumed;
                    n -= consumed;
                }
                if n > 0 && body_remaining > 0 {
                    let consumed = n.min(body_remaining);
                    conn.out_body_sent += consumed;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return SendResult::WouldBlock,
            Err(_) => return SendResult::Error,
        }
    }

    // File-to-socket transfer via a small resumable chunk buffer that
    // survives across would-block returns, trading true zero-copy for a
    // bounded per-iteration copy with straightforward offset/size
    // bookkeeping and partial-write handling.
    loop {
        if conn.out_file.is_none() {
            break;
        }
        if conn.out_file_chunk_sent == conn.out_file_chunk.len() {
            if conn.out_file_offset >= conn.out_file_size {
                conn.out_file = None;
                break;
            }
            let want = (conn.out_file_size - conn.out_file_offset).min(FILE_CHUNK as u64) as usize;
            conn.out_file_chunk.resize(want, 0);
            let file = conn.out_file.as_mut().unwrap();
            match file.read(&mut conn.out_file_chunk) {
                Ok(0) => {
                    conn.out_file = None;
                    break;
                }
                Ok(n) => {
                    conn.out_file_chunk.truncate(n);
                    conn.out_file_chunk_sent = 0;
                    conn.out_file_offset += n as u64;
                }
                Err(_) => return SendResult::Error,
            }
        }

        match stream.write(&conn.out_file_chunk[conn.out_file_chunk_sent..]) {
            Ok(0) => return SendResult::Error,
            Ok(n) => {
                conn.out_file_chunk_sent += n;
                if conn.out_file_chunk_sent == conn.out_file_chunk.len() {
                    conn.out_file_chunk.clear();
                    conn.out_file_chunk_sent = 0;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return SendResult::WouldBlock,
            Err(_) => return SendResult::Error,
        }
    }

    SendResult::Done
}

fn finish_request(conn: &mut Connection) -> Option<NextStep> {
    match try_send(conn) {
        SendResult::Done => {
            reset_output(conn);
            if conn.keep_alive {
                conn.compact_and_reset_for_next_request();
                None
            } else {
                Some(NextStep::Close)
            }
        }
        SendResult::WouldBlock => {
            conn.writing = true;
            Some(NextStep::ArmWrite(TimeoutKind::Request))
        }
        SendResult::Error => {
            reset_output(conn);
            Some(NextStep::Close)
        }
    }
}

/// Drives the read-parse-dispatch loop for one readiness event. May
/// process several pipelined requests in a row if they're already fully
/// buffered.
pub fn on_readable(conn: &mut Connection, ctx: &RequestCtx) -> NextStep {
    loop {
        if conn.parse_pos == conn.last {
            match fill_buffer(conn) {
                FillResult::Eof => return NextStep::Close,
                FillResult::WouldBlock => break,
                FillResult::Overflow => {
                    stage_error(conn, 500, false, ctx.config);
                    if let Some(step) = finish_request(conn) {
                        return step;
                    }
                    continue;
                }
                FillResult::Progressed => continue,
            }
        }

        match conn.advance_parse() {
            Err(_) => {
                stage_error(conn, 400, false, ctx.config);
                if let Some(step) = finish_request(conn) {
                    return step;
                }
                continue;
            }
            Ok(ParseProgress::Again) => continue,
            Ok(ParseProgress::Done) => {
                process_headers(conn);
                match dispatch(conn, ctx) {
                    DispatchOutcome::Cgi => return NextStep::CgiStarted,
                    DispatchOutcome::Handled => {
                        if let Some(step) = finish_request(conn) {
                            return step;
                        }
                        // keep-alive, fully sent, maybe another pipelined
                        // request is already buffered — loop around.
                    }
                }
            }
        }
    }

    let kind = if conn.last > 0 || conn.phase != ParsePhase::RequestLine {
        TimeoutKind::Request
    } else {
        TimeoutKind::KeepAlive
    };
    NextStep::ArmRead(kind)
}

pub fn on_writable(conn: &mut Connection) -> NextStep {
    if conn.cgi.is_some() {
        let Some(stream) = conn.stream.as_mut() else {
            return NextStep::Close;
        };
        let cgi = conn.cgi.as_mut().unwrap();
        match cgi.on_client_writable(stream) {
            crate::cgi::WriteOutcome::WouldBlock => NextStep::ArmWrite(TimeoutKind::Request),
            crate::cgi::WriteOutcome::DrainedChunk => NextStep::CgiAwaitMore,
            crate::cgi::WriteOutcome::DoneEof => {
                let _ = conn.cgi.as_mut().unwrap().child.try_wait();
                NextStep::Close
            }
            crate::cgi::WriteOutcome::Error => NextStep::Close,
        }
    } else {
        match try_send(conn) {
            SendResult::Done => {
                reset_output(conn);
                if conn.keep_alive {
                    NextStep::ArmRead(TimeoutKind::KeepAlive)
                } else {
                    NextStep::Close
                }
            }
            SendResult::WouldBlock => {
                conn.writing = true;
                NextStep::ArmWrite(TimeoutKind::Request)
            }
            SendResult::Error => {
                reset_output(conn);
                NextStep::Close
            }
        }
    }
}

pub fn on_cgi_readable(conn: &mut Connection) -> NextStep {
    let Some(cgi) = conn.cgi.as_mut() else {
        return NextStep::Close;
    };
    match cgi.on_stdout_readable() {
        Ok(crate::cgi::StdoutStep::Produced) => NextStep::ArmWrite(TimeoutKind::Request),
        Ok(crate::cgi::StdoutStep::AwaitMore) => {
            if cgi.eof {
                NextStep::CgiIdle
            } else {
                NextStep::CgiAwaitMore
            }
        }
        Err(_) => NextStep::Close,
    }
}

/// Tears a connection all the way down: kills any still-running CGI
/// child, drops output state and the socket. Idempotent-adjacent — the
/// worker only calls this once per connection per cycle since it
/// removes the connection from its token map first.
pub fn close(conn: &mut Connection) {
    if let Some(cgi) = conn.cgi.as_mut() {
        cgi.terminate();
    }
    conn.cgi = None;
    reset_output(conn);
    conn.headers.clear();
    conn.stream = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_starts_in_request_line_phase() {
        let conn = Connection::new();
        assert_eq!(conn.phase, ParsePhase::RequestLine);
        assert_eq!(conn.last, 0);
        assert!(!conn.keep_alive);
    }

    #[test]
    fn advance_parse_reads_request_line_then_headers() {
        let mut conn = Connection::new();
        let data = b"GET /a.txt HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        conn.buf[..data.len()].copy_from_slice(data);
        conn.last = data.len();

        assert_eq!(conn.advance_parse().unwrap(), ParseProgress::Done);
        assert!(conn.method.is_get());
        assert_eq!(conn.uri, "/a.txt");
        assert_eq!(conn.headers.len(), 2);
    }

    #[test]
    fn advance_parse_reports_again_on_partial_input() {
        let mut conn = Connection::new();
        let data = b"GET /a.txt HTTP/1.1\r\n";
        conn.buf[..data.len()].copy_from_slice(data);
        conn.last = data.len();
        assert_eq!(conn.advance_parse().unwrap(), ParseProgress::Again);
    }

    #[test]
    fn process_headers_honors_connection_close_override() {
        let mut conn = Connection::new();
        conn.http_major = 1;
        conn.http_minor = 1;
        conn.headers.push(("Connection".into(), "close".into()));
        process_headers(&mut conn);
        assert!(!conn.keep_alive);
    }

    #[test]
    fn process_headers_defaults_http10_to_close() {
        let mut conn = Connection::new();
        conn.http_major = 1;
        conn.http_minor = 0;
        process_headers(&mut conn);
        assert!(!conn.keep_alive);
    }

    #[test]
    fn reset_clears_everything_pool_relies_on() {
        let mut conn = Connection::new();
        conn.keep_alive = true;
        conn.last = 10;
        conn.headers.push(("a".into(), "b".into()));
        conn.reset();
        assert!(!conn.keep_alive);
        assert_eq!(conn.last, 0);
        assert!(conn.headers.is_empty());
        assert!(conn.stream.is_none());
    }

    #[test]
    fn static_dispatch_serves_existing_file_with_200() {
        let dir = std::env::temp_dir().join(format!("zaver-conn-test-{}-a", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hi.txt"), b"hello").unwrap();

        let config = AppConfig {
            root: dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let ctx = RequestCtx { docroot: &dir, config: &config };

        let mut conn = Connection::new();
        conn.uri = "/hi.txt".to_string();
        conn.keep_alive = true;
        let outcome = handle_static_dispatch(&mut conn, &ctx);
        assert!(matches!(outcome, DispatchOutcome::Handled));
        assert!(conn.out_file.is_some());
        assert_eq!(conn.out_file_size, 5);
        let text = String::from_utf8(conn.out_header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn static_dispatch_missing_file_stages_404() {
        let dir = std::env::temp_dir().join(format!("zaver-conn-test-{}-b", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let config = AppConfig {
            root: dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let ctx = RequestCtx { docroot: &dir, config: &config };

        let mut conn = Connection::new();
        conn.uri = "/missing.txt".to_string();
        handle_static_dispatch(&mut conn, &ctx);
        let text = String::from_utf8(conn.out_header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn static_dispatch_traversal_stages_403() {
        let dir = std::env::temp_dir().join(format!("zaver-conn-test-{}-c", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let config = AppConfig {
            root: dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let ctx = RequestCtx { docroot: &dir, config: &config };

        let mut conn = Connection::new();
        conn.uri = "/../../etc/passwd".to_string();
        handle_static_dispatch(&mut conn, &ctx);
        let text = String::from_utf8(conn.out_header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[test]
    fn cgi_dispatch_rejects_non_get_with_405() {
        let dir = std::env::temp_dir().join(format!("zaver-conn-test-{}-d", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let config = AppConfig {
            root: dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let ctx = RequestCtx { docroot: &dir, config: &config };

        let mut conn = Connection::new();
        conn.uri = "/cgi-bin/anything".to_string();
        conn.method = Method::Other("POST".to_string());
        let outcome = handle_cgi_dispatch(&mut conn, &ctx, "/cgi-bin/anything");
        assert!(matches!(outcome, DispatchOutcome::Handled));
        let text = String::from_utf8(conn.out_header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(!conn.keep_alive);
    }

    #[test]
    fn cgi_dispatch_missing_script_stages_404() {
        let dir = std::env::temp_dir().join(format!("zaver-conn-test-{}-e", std::process::id()));
        std::fs::create_dir_all(dir.join("cgi-bin")).unwrap();

        let config = AppConfig {
            root: dir.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        let ctx = RequestCtx { docroot: &dir, config: &config };

        let mut conn = Connection::new();
        conn.uri = "/cgi-bin/nope".to_string();
        handle_cgi_dispatch(&mut conn, &ctx, "/cgi-bin/nope");
        let text = String::from_utf8(conn.out_header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404"));
    }
}
