//! Thin wrapper around `mio`'s edge-triggered, one-shot readiness
//! multiplexer. Collects `register`/`rearm`/`wait` under one vocabulary
//! rather than scattering raw `poll.registry()` calls through the
//! connection and CGI modules.
//!
//! mio registrations are already edge-triggered and (for a oneshot-style
//! `reregister` after every event) effectively one-shot in how this crate
//! uses them: every handler either closes the fd or re-arms it for exactly
//! one direction before returning to the loop.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Multiplexer {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
        })
    }

    pub fn register(&self, source: &mut impl Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn rearm(&self, source: &mut impl Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn unregister(&self, source: &mut impl Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks until at least one event arrives or `timeout_ms` elapses.
    /// `None` blocks indefinitely (empty timer wheel).
    pub fn wait(&mut self, timeout_ms: Option<u64>) -> io::Result<()> {
        let timeout = timeout_ms.map(Duration::from_millis);
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn events(&self) -> &Events {
        &self.events
    }
}
