//! The per-worker event loop: accept connections off its own
//! `SO_REUSEPORT` listener, dispatch readiness events to the
//! connection/CGI state machines, run expired timers, and flush
//! deferred connection releases once per turn.
//!
//! One `Poll::poll` call per turn uses the nearest timer deadline as the
//! timeout. The listen socket's accept loop drains every pending
//! connection, then readiness events are handled in three buckets
//! (listen / CGI stdout / connection), followed by expired timers and a
//! deferred-free flush. Every registration is one-shot, so every
//! handler ends with exactly one rearm call for the direction it wants
//! next.

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Instant;

use mio::unix::SourceFd;
use mio::{Interest, Token};

use crate::config::AppConfig;
use crate::conn::{self, Connection, NextStep, RequestCtx, TimeoutKind};
use crate::mux::Multiplexer;
use crate::pool::{ConnPool, DeferredRelease, HeaderPool};
use crate::signals;
use crate::timer::{self, TimerWheel};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const EVENT_CAPACITY: usize = 1024;

pub struct Worker {
    id: usize,
    listener: mio::net::TcpListener,
    mux: Multiplexer,
    conns: HashMap<Token, Box<Connection>>,
    /// CGI stdout fd token -> owning connection token.
    cgi_index: HashMap<Token, Token>,
    conn_pool: ConnPool,
    header_pool: HeaderPool,
    deferred: DeferredRelease,
    timers: TimerWheel,
    docroot: PathBuf,
    config: AppConfig,
    start: Instant,
}

impl Worker {
    pub fn new(id: usize, listener: mio::net::TcpListener, docroot: PathBuf, config: AppConfig) -> io::Result<Self> {
        let mux = Multiplexer::new(EVENT_CAPACITY)?;
        let mut worker = Worker {
            id,
            listener,
            mux,
            conns: HashMap::new(),
            cgi_index: HashMap::new(),
            conn_pool: ConnPool::new(),
            header_pool: HeaderPool::new(),
            deferred: DeferredRelease::new(),
            timers: TimerWheel::new(),
            docroot,
            config,
            start: Instant::now(),
        };
        worker.mux.register(&mut worker.listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(worker)
    }

    pub fn run(&mut self) -> io::Result<()> {
        tracing::info!(worker_id = self.id, "worker started");
        while !signals::should_stop() {
            self.tick()?;
        }
        tracing::info!(worker_id = self.id, "worker stopping");
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn live_snapshot(&self) -> HashMap<Token, u64> {
        self.conns
            .iter()
            .filter_map(|(token, conn)| conn.timer_seq.map(|seq| (*token, seq)))
            .collect()
    }

    fn tick(&mut self) -> io::Result<()> {
        let now = self.now_ms();
        let live = self.live_snapshot();
        let next = self.timers.next_timeout(now, |t, s| live.get(&t).copied() == Some(s));
        let timeout_ms = if next == timer::INFINITE { None } else { Some(next as u64) };

        self.mux.wait(timeout_ms)?;

        let batch: Vec<(Token, bool, bool, bool)> = self
            .mux
            .events()
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable(), e.is_error()))
            .collect();

        for (token, readable, writable, errored) in batch {
            if token == LISTENER_TOKEN {
                if readable {
                    self.accept_loop();
                }
                continue;
            }

            if errored {
                self.log_socket_error(token);
                self.close_connection(token);
                continue;
            }

            if let Some(&owner) = self.cgi_index.get(&token) {
                if readable {
                    self.handle_cgi_readable(owner);
                }
                continue;
            }

            if readable {
                self.handle_conn_readable(token);
            } else if writable {
                self.handle_conn_writable(token);
            }
        }

        let now = self.now_ms();
        let expired = {
            let live = self.live_snapshot();
            let mut fired = Vec::new();
            self.timers.run_expired(now, |t, s| live.get(&t).copied() == Some(s), |t| fired.push(t));
            fired
        };
        for token in expired {
            // Both idle keep-alive expiry and in-flight request expiry
            // are silent closes; no response is sent on either path.
            self.close_connection(token);
        }

        self.deferred.flush(&mut self.conn_pool, &mut self.header_pool);
        Ok(())
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.adopt_connection(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(worker_id = self.id, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn adopt_connection(&mut self, stream: mio::net::TcpStream) {
        let _ = stream.set_nodelay(true);

        let mut conn = self.conn_pool.get();
        conn.headers = self.header_pool.get();
        conn.accept_stream(stream);
        let Some(token) = conn.token() else { return };

        if let Some(s) = conn.stream.as_mut() {
            if self.mux.register(s, token, Interest::READABLE).is_err() {
                return;
            }
        }

        let now = self.now_ms();
        let seq = self.timers.arm(token, now, self.config.keep_alive_timeout_ms);
        conn.timer_seq = Some(seq);
        self.conns.insert(token, conn);
    }

    fn log_socket_error(&self, token: Token) {
        let Some(conn) = self.conns.get(&token) else { return };
        let Some(stream) = conn.stream.as_ref() else { return };
        let err = socket2::SockRef::from(stream).take_error().ok().flatten();
        match err {
            None => tracing::debug!(worker_id = self.id, fd = stream.as_raw_fd(), "peer disconnected"),
            Some(e) => tracing::debug!(worker_id = self.id, fd = stream.as_raw_fd(), error = %e, "socket error"),
        }
    }

    fn handle_conn_readable(&mut self, token: Token) {
        let step = {
            let Worker { conns, docroot, config, .. } = self;
            conns.get_mut(&token).map(|conn| {
                let ctx = RequestCtx { docroot, config };
                conn::on_readable(conn, &ctx)
            })
        };
        if let Some(step) = step {
            self.apply_next_step(token, step);
        }
    }

    fn handle_conn_writable(&mut self, token: Token) {
        let step = {
            let Worker { conns, .. } = self;
            conns.get_mut(&token).map(conn::on_writable)
        };
        if let Some(step) = step {
            self.apply_next_step(token, step);
        }
    }

    fn handle_cgi_readable(&mut self, owner: Token) {
        let step = {
            let Worker { conns, .. } = self;
            conns.get_mut(&owner).map(conn::on_cgi_readable)
        };
        if let Some(step) = step {
            self.apply_next_step(owner, step);
        }
    }

    fn apply_next_step(&mut self, token: Token, step: NextStep) {
        match step {
            NextStep::ArmRead(kind) => self.rearm_client(token, Interest::READABLE, kind),
            NextStep::ArmWrite(kind) => self.rearm_client(token, Interest::WRITABLE, kind),
            NextStep::CgiStarted => self.register_cgi(token),
            NextStep::CgiAwaitMore => self.rearm_cgi_read(token),
            NextStep::CgiIdle => self.arm_timer(token, TimeoutKind::Request),
            NextStep::Close => self.close_connection(token),
        }
    }

    fn rearm_client(&mut self, token: Token, interest: Interest, kind: TimeoutKind) {
        {
            let Worker { conns, mux, .. } = self;
            if let Some(conn) = conns.get_mut(&token) {
                if let Some(stream) = conn.stream.as_mut() {
                    let _ = mux.rearm(stream, token, interest);
                }
            }
        }
        self.arm_timer(token, kind);
    }

    fn arm_timer(&mut self, token: Token, kind: TimeoutKind) {
        let ms = match kind {
            TimeoutKind::KeepAlive => self.config.keep_alive_timeout_ms,
            TimeoutKind::Request => self.config.request_timeout_ms,
        };
        let now = self.now_ms();
        let seq = self.timers.arm(token, now, ms);
        if let Some(conn) = self.conns.get_mut(&token) {
            conn.timer_seq = Some(seq);
        }
    }

    fn register_cgi(&mut self, owner: Token) {
        let mut cgi_token = None;
        {
            let Worker { conns, mux, .. } = self;
            if let Some(conn) = conns.get_mut(&owner) {
                if let Some(cgi) = conn.cgi.as_mut() {
                    let token = Token(cgi.stdout_fd as usize);
                    let mut source = SourceFd(&cgi.stdout_fd);
                    if mux.register(&mut source, token, Interest::READABLE).is_ok() {
                        cgi_token = Some(token);
                    }
                }
            }
        }
        let Some(cgi_token) = cgi_token else {
            self.close_connection(owner);
            return;
        };
        self.cgi_index.insert(cgi_token, owner);
        self.arm_timer(owner, TimeoutKind::Request);
    }

    fn rearm_cgi_read(&mut self, owner: Token) {
        {
            let Worker { conns, mux, .. } = self;
            if let Some(conn) = conns.get_mut(&owner) {
                if let Some(cgi) = conn.cgi.as_mut() {
                    let token = Token(cgi.stdout_fd as usize);
                    let mut source = SourceFd(&cgi.stdout_fd);
                    let _ = mux.rearm(&mut source, token, Interest::READABLE);
                }
            }
        }
        self.arm_timer(owner, TimeoutKind::Request);
    }

    fn close_connection(&mut self, token: Token) {
        let Some(mut boxed) = self.conns.remove(&token) else { return };

        if let Some(stream) = boxed.stream.as_mut() {
            let _ = self.mux.unregister(stream);
        }
        if let Some(cgi) = boxed.cgi.as_mut() {
            let cgi_token = Token(cgi.stdout_fd as usize);
            let mut source = SourceFd(&cgi.stdout_fd);
            let _ = self.mux.unregister(&mut source);
            self.cgi_index.remove(&cgi_token);
        }

        conn::close(&mut boxed);
        self.deferred.push(boxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    fn test_worker(docroot: PathBuf) -> Worker {
        let std_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let listener = mio::net::TcpListener::from_std(std_listener);
        let config = AppConfig {
            root: docroot.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        Worker::new(0, listener, docroot, config).unwrap()
    }

    #[test]
    fn new_worker_registers_listener_without_error() {
        let dir = std::env::temp_dir().join(format!("zaver-worker-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let worker = test_worker(dir);
        assert_eq!(worker.conns.len(), 0);
        assert!(worker.cgi_index.is_empty());
    }

    #[test]
    fn live_snapshot_reflects_armed_timers() {
        let dir = std::env::temp_dir().join(format!("zaver-worker-test-{}-b", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut worker = test_worker(dir);

        let mut conn = Box::new(Connection::new());
        let seq = worker.timers.arm(Token(7), 0, 1000);
        conn.timer_seq = Some(seq);
        worker.conns.insert(Token(7), conn);

        let live = worker.live_snapshot();
        assert_eq!(live.get(&Token(7)), Some(&seq));
    }
}
