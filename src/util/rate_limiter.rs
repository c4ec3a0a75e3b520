//! Composable token-bucket rate limiting (spec §4.6).
//!
//! A [`RateLimiter`] can be attached under a parent so that the effective
//! rate available to a holder is the minimum of its own bucket and every
//! ancestor's remaining bucket. `0` means unlimited, as everywhere else in
//! this crate's limit types.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

struct Bucket {
    limit_bytes_per_sec: u64,
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(limit: u64) -> Self {
        Self {
            limit_bytes_per_sec: limit,
            available: limit as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        if self.limit_bytes_per_sec == 0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.available = (self.available + elapsed * self.limit_bytes_per_sec as f64)
            .min(self.limit_bytes_per_sec as f64);
    }

    /// Returns the number of bytes immediately available, and the wait
    /// needed before `wanted` more bytes could be released.
    fn poll(&mut self, wanted: u64, now: Instant) -> (u64, Duration) {
        if self.limit_bytes_per_sec == 0 {
            return (wanted, Duration::ZERO);
        }
        self.refill(now);
        let grant = wanted.min(self.available.floor() as u64);
        self.available -= grant as f64;
        let remaining = wanted - grant;
        let wait = if remaining == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(remaining as f64 / self.limit_bytes_per_sec as f64)
        };
        (grant, wait)
    }
}

struct Inner {
    inbound: Mutex<Bucket>,
    outbound: Mutex<Bucket>,
    parent: Option<RateLimiter>,
}

/// A handle whose lifetime equals the longest holder; cloning shares the
/// same underlying buckets (a session and its connections see the same
/// budget), while `child_of` creates a fresh bucket constrained by the
/// parent's remaining budget.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(inbound_limit: u64, outbound_limit: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                inbound: Mutex::new(Bucket::new(inbound_limit)),
                outbound: Mutex::new(Bucket::new(outbound_limit)),
                parent: None,
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// A stable per-instance identity, used only to give a deterministic
    /// ordering to collections of limiters (e.g. a user's extra group
    /// limiters, which the original keeps sorted by `shared_ptr` identity).
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Attaches a new limiter under `self` as parent.
    pub fn child(&self, inbound_limit: u64, outbound_limit: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                inbound: Mutex::new(Bucket::new(inbound_limit)),
                outbound: Mutex::new(Bucket::new(outbound_limit)),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Reconfigures the limits of an already-shared limiter in place, so
    /// that every clone (e.g. every session holding this user's limiter)
    /// observes the change, as config reloads do.
    pub fn set_limits(&self, inbound_limit: u64, outbound_limit: u64) {
        let mut inbound = self.inner.inbound.lock().unwrap();
        inbound.limit_bytes_per_sec = inbound_limit;
        if inbound_limit > 0 {
            inbound.available = inbound.available.min(inbound_limit as f64);
        }
        drop(inbound);

        let mut outbound = self.inner.outbound.lock().unwrap();
        outbound.limit_bytes_per_sec = outbound_limit;
        if outbound_limit > 0 {
            outbound.available = outbound.available.min(outbound_limit as f64);
        }
    }

    /// Requests `wanted` bytes in `dir`. Returns the bytes granted now and
    /// how long to wait before the remainder would become available,
    /// accounting for every ancestor in the chain.
    pub fn poll(&self, dir: Direction, wanted: u64) -> (u64, Duration) {
        let now = Instant::now();
        let (mut grant, mut wait) = self.poll_self(dir, wanted, now);

        let mut parent = self.inner.parent.clone();
        while let Some(p) = parent {
            let (pgrant, pwait) = p.poll_self(dir, grant.max(1).min(wanted), now);
            grant = grant.min(pgrant);
            wait = wait.max(pwait);
            parent = p.inner.parent.clone();
        }

        (grant, wait)
    }

    fn poll_self(&self, dir: Direction, wanted: u64, now: Instant) -> (u64, Duration) {
        let bucket = match dir {
            Direction::Inbound => &self.inner.inbound,
            Direction::Outbound => &self.inner.outbound,
        };
        bucket.lock().unwrap().poll(wanted, now)
    }

    /// Blocks the caller (asynchronously) until `wanted` bytes of `dir`
    /// budget, bounded by every ancestor, are available, then consumes them.
    pub async fn acquire(&self, dir: Direction, wanted: u64) {
        let mut remaining = wanted;
        while remaining > 0 {
            let (grant, wait) = self.poll(dir, remaining);
            remaining -= grant;
            if remaining > 0 {
                tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_blocks() {
        let l = RateLimiter::unlimited();
        let (grant, wait) = l.poll(Direction::Outbound, 10_000_000);
        assert_eq!(grant, 10_000_000);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn child_is_bounded_by_parent() {
        let parent = RateLimiter::new(100, 100);
        let child = parent.child(1_000, 1_000);
        let (grant, _) = child.poll(Direction::Inbound, 1_000);
        assert_eq!(grant, 100, "child cannot exceed parent's remaining budget");
    }

    #[test]
    fn unlimited_parent_does_not_tighten_child() {
        let parent = RateLimiter::unlimited();
        let child = parent.child(50, 50);
        let (grant, _) = child.poll(Direction::Inbound, 200);
        assert_eq!(grant, 50);
    }
}
