//! Min-heap timer wheel keyed on a monotonic millisecond deadline, with
//! lazy deletion.
//!
//! A binary heap (`swim`/`sink` over a `Vec`, compared on `deadline_ms`)
//! holds timer entries. Rather than reaching into the heap to cancel or
//! reschedule an entry in place, each connection carries a `timer_seq`
//! and every heap entry is stamped with the sequence number current when
//! it was armed. A popped entry only fires if it's still the
//! connection's *current* sequence; cancelling or re-arming just bumps
//! the connection's sequence and leaves the old heap entry to expire
//! inert.

use mio::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerNode {
    deadline_ms: u64,
    token: Token,
    seq: u64,
}

/// No pending timer anywhere in the heap.
pub const INFINITE: i32 = -1;

#[derive(Default)]
pub struct TimerWheel {
    heap: Vec<TimerNode>, // heap[0] is the min; plain 0-based binary heap
    next_seq: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel {
            heap: Vec::new(),
            next_seq: 1,
        }
    }

    /// Arms a new timer for `token`, due at `now_ms + timeout_ms`. Returns the
    /// sequence number the caller must stash on its connection object (e.g.
    /// `conn.timer_seq = Some(seq)`); passing that same value back to
    /// [`TimerWheel::cancel`] is not required — cancellation just clears the
    /// stored sequence, which this module checks for on expiry.
    pub fn arm(&mut self, token: Token, now_ms: u64, timeout_ms: u64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let node = TimerNode {
            deadline_ms: now_ms + timeout_ms,
            token,
            seq,
        };
        self.heap.push(node);
        self.swim(self.heap.len() - 1);
        seq
    }

    /// Milliseconds until the earliest *live* timer, or [`INFINITE`] if none
    /// remain live. Stale (superseded) entries at the top are dropped along
    /// the way, matching the C version folding cleanup into the same scan.
    pub fn next_timeout(&mut self, now_ms: u64, is_live: impl Fn(Token, u64) -> bool) -> i32 {
        while let Some(top) = self.heap.first() {
            if !is_live(top.token, top.seq) {
                self.delmin();
                continue;
            }
            let remaining = top.deadline_ms.saturating_sub(now_ms);
            return remaining.min(i32::MAX as u64) as i32;
        }
        INFINITE
    }

    /// Fires `on_expire(token)` for every live entry whose deadline has
    /// passed, in non-decreasing deadline order, then removes it. Stops at
    /// the first entry that either is still live and not yet due.
    pub fn run_expired(&mut self, now_ms: u64, mut is_live: impl FnMut(Token, u64) -> bool, mut on_expire: impl FnMut(Token)) {
        loop {
            let Some(top) = self.heap.first().copied() else {
                return;
            };
            if !is_live(top.token, top.seq) {
                self.delmin();
                continue;
            }
            if top.deadline_ms > now_ms {
                return;
            }
            on_expire(top.token);
            self.delmin();
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn delmin(&mut self) {
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.heap.pop();
        if !self.heap.is_empty() {
            self.sink(0);
        }
    }

    fn swim(&mut self, mut k: usize) {
        while k > 0 {
            let parent = (k - 1) / 2;
            if self.heap[k].deadline_ms >= self.heap[parent].deadline_ms {
                break;
            }
            self.heap.swap(k, parent);
            k = parent;
        }
    }

    fn sink(&mut self, mut k: usize) {
        let n = self.heap.len();
        loop {
            let mut smallest = k;
            let left = 2 * k + 1;
            let right = 2 * k + 2;
            if left < n && self.heap[left].deadline_ms < self.heap[smallest].deadline_ms {
                smallest = left;
            }
            if right < n && self.heap[right].deadline_ms < self.heap[smallest].deadline_ms {
                smallest = right;
            }
            if smallest == k {
                break;
            }
            self.heap.swap(k, smallest);
            k = smallest;
        }
    }

    #[cfg(test)]
    fn is_min_heap(&self) -> bool {
        for k in 0..self.heap.len() {
            let left = 2 * k + 1;
            let right = 2 * k + 2;
            if left < self.heap.len() && self.heap[left].deadline_ms < self.heap[k].deadline_ms {
                return false;
            }
            if right < self.heap.len() && self.heap[right].deadline_ms < self.heap[k].deadline_ms {
                return false;
            }
        }
        true
    }
}
