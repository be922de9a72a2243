//! Process-local object pools: a free-list of connection blocks, a
//! free-list of header-node buffers, and the deferred-release queue that
//! lets a handler close a connection mid-batch without invalidating events
//! for that same connection still waiting later in the batch.
//!
//! Each pool is the same algorithm: pop from the free-list or allocate,
//! reset and push back on return unless already at capacity.

use crate::conn::Connection;

const DEFAULT_CONN_POOL_CAP: usize = 65_536;
const DEFAULT_HEADER_POOL_CAP: usize = 8_192;

pub struct ConnPool {
    free: Vec<Box<Connection>>,
    cap: usize,
}

impl ConnPool {
    pub fn new() -> Self {
        ConnPool::with_capacity(DEFAULT_CONN_POOL_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        ConnPool {
            free: Vec::new(),
            cap,
        }
    }

    /// Pops a reset connection block off the free-list, or allocates a new
    /// one if the free-list is empty.
    pub fn get(&mut self) -> Box<Connection> {
        self.free.pop().unwrap_or_else(|| Box::new(Connection::new()))
    }

    /// Returns a torn-down connection block to the free-list, unless the
    /// pool is already at capacity, in which case it is simply dropped.
    pub fn put(&mut self, mut conn: Box<Connection>) {
        if self.free.len() < self.cap {
            conn.reset();
            self.free.push(conn);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Default for ConnPool {
    fn default() -> Self {
        Self::new()
    }
}

pub type HeaderNode = (String, String);

pub struct HeaderPool {
    free: Vec<Vec<HeaderNode>>,
    cap: usize,
}

impl HeaderPool {
    pub fn new() -> Self {
        HeaderPool::with_capacity(DEFAULT_HEADER_POOL_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        HeaderPool {
            free: Vec::new(),
            cap,
        }
    }

    pub fn get(&mut self) -> Vec<HeaderNode> {
        self.free.pop().unwrap_or_default()
    }

    pub fn put(&mut self, mut headers: Vec<HeaderNode>) {
        if self.free.len() < self.cap {
            headers.clear();
            self.free.push(headers);
        }
    }
}

impl Default for HeaderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Connections queued for return to [`ConnPool`] at the next safe point —
/// after the current readiness batch and expired-timer pass have both
/// fully drained, so no unseen event can still reference them.
#[derive(Default)]
pub struct DeferredRelease {
    pending: Vec<Box<Connection>>,
}

impl DeferredRelease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conn: Box<Connection>) {
        self.pending.push(conn);
    }

    pub fn flush(&mut self, pool: &mut ConnPool, headers: &mut HeaderPool) {
        for mut conn in self.pending.drain(..) {
            headers.put(std::mem::take(&mut conn.headers));
            pool.put(conn);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_pool_round_trips() {
        let mut pool = ConnPool::new();
        let mut conn = pool.get();
        conn.keep_alive = true;
        conn.last = 42;
        pool.put(conn);
        assert_eq!(pool.free_count(), 1);

        let conn2 = pool.get();
        assert!(!conn2.keep_alive);
        assert_eq!(conn2.last, 0);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn conn_pool_respects_cap() {
        let mut pool = ConnPool::with_capacity(1);
        pool.put(Box::new(Connection::new()));
        pool.put(Box::new(Connection::new()));
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn header_pool_clears_on_put() {
        let mut pool = HeaderPool::new();
        let mut h = pool.get();
        h.push(("host".into(), "x".into()));
        pool.put(h);
        let h2 = pool.get();
        assert!(h2.is_empty());
    }

    #[test]
    fn deferred_release_flush_returns_everything() {
        let mut deferred = DeferredRelease::new();
        let mut conn_pool = ConnPool::new();
        let mut header_pool = HeaderPool::new();

        deferred.push(Box::new(Connection::new()));
        deferred.push(Box::new(Connection::new()));
        assert_eq!(deferred.len(), 2);

        deferred.flush(&mut conn_pool, &mut header_pool);
        assert!(deferred.is_empty());
        assert_eq!(conn_pool.free_count(), 2);
    }
}
