//! Failed-login throttling and autobanning (spec §2 item 7, §4.1
//! "Throttling wrapper", §9 Open Questions).
//!
//! Grounded on the original's layering: a `throttled_authenticator` wraps
//! the core authenticator and enforces a minimum delay between failed
//! attempts from the same IP, while a separate `autobanner` keeps a
//! short-lived in-memory tally of failures per IP and bans once a
//! threshold is crossed within a window. Both caches are backed by `moka`,
//! the same crate this codebase already reaches for elsewhere in the
//! pack for TTL'd in-memory state, so entries expire on their own instead
//! of needing a background sweep.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;

use super::error::AuthError;
use super::method::AuthMethod;
use super::{AuthStep, Authenticator, Worker};

/// Bans an IP once it accumulates `max_failures` failed attempts within
/// `window`; the ban itself lasts `ban_duration`, after which the IP is
/// treated as clean again (spec: "no further attempts accepted from a
/// banned IP until TTL expiry").
pub struct AutobannerConfig {
    pub max_failures: u32,
    pub window: Duration,
    pub ban_duration: Duration,
}

impl Default for AutobannerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(60),
            ban_duration: Duration::from_secs(300),
        }
    }
}

pub struct Autobanner {
    failures: Cache<IpAddr, u32>,
    banned: Cache<IpAddr, ()>,
    max_failures: u32,
}

impl Autobanner {
    pub fn new(config: AutobannerConfig) -> Self {
        Self {
            failures: Cache::builder().time_to_live(config.window).build(),
            banned: Cache::builder().time_to_live(config.ban_duration).build(),
            max_failures: config.max_failures.max(1),
        }
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned.contains_key(&ip)
    }

    /// Tallies one failed attempt; returns whether this call is the one
    /// that crossed the threshold and banned `ip`.
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        if self.is_banned(ip) {
            return false;
        }
        let count = self.failures.get(&ip).unwrap_or(0) + 1;
        if count >= self.max_failures {
            self.failures.invalidate(&ip);
            self.banned.insert(ip, ());
            true
        } else {
            self.failures.insert(ip, count);
            false
        }
    }

    /// A successful login clears the tally, matching common brute-force
    /// guard behavior: only *consecutive* failures count toward a ban.
    pub fn record_success(&self, ip: IpAddr) {
        self.failures.invalidate(&ip);
    }
}

struct ThrottleState {
    autobanner: Autobanner,
    min_delay: Duration,
    last_attempt: Cache<IpAddr, Instant>,
}

impl ThrottleState {
    async fn delay_if_needed(&self, ip: IpAddr) {
        if self.min_delay.is_zero() {
            return;
        }
        if let Some(last) = self.last_attempt.get(&ip) {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
    }

    fn note_failure(&self, ip: IpAddr) {
        self.last_attempt.insert(ip, Instant::now());
        self.autobanner.record_failure(ip);
    }

    fn note_success(&self, ip: IpAddr) {
        self.last_attempt.invalidate(&ip);
        self.autobanner.record_success(ip);
    }
}

/// Wraps an [`Authenticator`] with per-IP delay and ban enforcement.
/// Cheap to clone: state is shared via `Arc`, same as `Authenticator`.
#[derive(Clone)]
pub struct ThrottledAuthenticator {
    inner: Authenticator,
    state: Arc<ThrottleState>,
}

/// What a throttled attempt-chain start yields: either the IP is
/// currently banned (the caller should close the connection without
/// touching the store at all), or a normal step with a worker to
/// continue the chain on.
pub enum ThrottledStep {
    Banned,
    Step(ThrottledWorker, AuthStep),
}

impl ThrottledAuthenticator {
    pub fn new(inner: Authenticator, autobanner: Autobanner, min_delay: Duration) -> Self {
        let ttl = (min_delay * 10).max(Duration::from_secs(1));
        Self {
            inner,
            state: Arc::new(ThrottleState {
                autobanner,
                min_delay,
                last_attempt: Cache::builder().time_to_live(ttl).build(),
            }),
        }
    }

    pub fn is_banned(&self, peer_ip: IpAddr) -> bool {
        self.state.autobanner.is_banned(peer_ip)
    }

    pub async fn begin(&self, name: &str, peer_ip: IpAddr) -> ThrottledStep {
        if self.state.autobanner.is_banned(peer_ip) {
            return ThrottledStep::Banned;
        }
        self.state.delay_if_needed(peer_ip).await;

        let (worker, step) = self.inner.begin(name, peer_ip).await;
        note_outcome(&self.state, peer_ip, &step);

        ThrottledStep::Step(ThrottledWorker { inner: worker, peer_ip, state: self.state.clone() }, step)
    }
}

fn note_outcome(state: &ThrottleState, peer_ip: IpAddr, step: &AuthStep) {
    match step {
        AuthStep::Reject(e) if e.is_user_fault() => state.note_failure(peer_ip),
        AuthStep::Success(_) => state.note_success(peer_ip),
        _ => {}
    }
}

/// A [`Worker`] wrapped so that its outcome also feeds the throttle state.
pub struct ThrottledWorker {
    inner: Worker,
    peer_ip: IpAddr,
    state: Arc<ThrottleState>,
}

impl ThrottledWorker {
    pub async fn verify(self, offered: &[(AuthMethod, Option<String>)], just_verify: bool) -> AuthStep {
        let peer_ip = self.peer_ip;
        let state = self.state;
        let step = self.inner.verify(offered, just_verify).await;
        note_outcome(&state, peer_ip, &step);
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::from([198, 51, 100, n])
    }

    #[test]
    fn autobanner_bans_after_threshold() {
        let banner = Autobanner::new(AutobannerConfig { max_failures: 3, window: Duration::from_secs(60), ban_duration: Duration::from_secs(60) });
        let addr = ip(1);
        assert!(!banner.record_failure(addr));
        assert!(!banner.record_failure(addr));
        assert!(banner.record_failure(addr));
        assert!(banner.is_banned(addr));
    }

    #[test]
    fn autobanner_success_resets_tally() {
        let banner = Autobanner::new(AutobannerConfig { max_failures: 3, window: Duration::from_secs(60), ban_duration: Duration::from_secs(60) });
        let addr = ip(2);
        banner.record_failure(addr);
        banner.record_failure(addr);
        banner.record_success(addr);
        assert!(!banner.record_failure(addr));
        assert!(!banner.is_banned(addr));
    }

    #[test]
    fn banned_ip_stays_banned_until_successive_record_failure_calls_stop() {
        let banner = Autobanner::new(AutobannerConfig { max_failures: 1, window: Duration::from_secs(60), ban_duration: Duration::from_secs(60) });
        let addr = ip(3);
        assert!(banner.record_failure(addr));
        assert!(banner.is_banned(addr));
        assert!(!banner.record_failure(addr), "already banned, this call should be a no-op");
    }

    #[tokio::test]
    async fn begin_rejects_banned_ip_without_consulting_the_store() {
        use super::super::{Authenticator, Store};
        use crate::tvfs::NativeFormat;

        let authenticator = Authenticator::new(Store::default(), None, NativeFormat::Posix);
        let banner = Autobanner::new(AutobannerConfig { max_failures: 1, window: Duration::from_secs(60), ban_duration: Duration::from_secs(60) });
        let addr = ip(4);
        banner.record_failure(addr);
        assert!(banner.is_banned(addr));

        let throttled = ThrottledAuthenticator::new(authenticator, banner, Duration::ZERO);
        match throttled.begin("anyone", addr).await {
            ThrottledStep::Banned => {}
            ThrottledStep::Step(..) => panic!("expected the ban to short-circuit before touching the store"),
        }
    }

    #[tokio::test]
    async fn minimum_delay_is_enforced_between_attempts() {
        use super::super::{Authenticator, Store};
        use crate::tvfs::NativeFormat;

        let authenticator = Authenticator::new(Store::default(), None, NativeFormat::Posix);
        let banner = Autobanner::new(AutobannerConfig { max_failures: 100, window: Duration::from_secs(60), ban_duration: Duration::from_secs(60) });
        let throttled = ThrottledAuthenticator::new(authenticator, banner, Duration::from_millis(50));
        let addr = ip(5);

        let _ = throttled.begin("ghost", addr).await;
        let started = Instant::now();
        let _ = throttled.begin("ghost", addr).await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
