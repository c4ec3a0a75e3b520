//! The live, authenticated handle sessions hold (spec §3 `SharedUser`).
//!
//! Grounded on `authentication/user.hpp`'s `shared_user`/`weak_user` pair
//! and its `shared_user_deleter`-held subscriber set: here a
//! `tokio::sync::watch` channel plays the role of the subscriber list
//! (`subscribe`/`notify`), and a `DashMap<String, Weak<SharedUser>>` plays
//! the role of `weak_users_map_`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::tvfs::{Backend, MountTree};
use crate::util::{LimitedCopiesCounter, RateLimiter};

use super::credentials::ImpersonationToken;
use super::group::GroupLimiters;
use crate::tvfs::limits::OpenLimits;

/// A (now possibly stale) `id`: cleared on invalidation so holders can
/// detect that their copy no longer names a live principal.
type SharedId = Mutex<Option<Uuid>>;

pub struct SharedUser {
    id: SharedId,
    pub name: String,
    pub mount_tree: MountTree,
    pub backend: Arc<dyn Backend>,
    pub impersonation_token: Option<ImpersonationToken>,
    pub limiter: RateLimiter,
    /// Sorted ascending, as the original sorts `extra_limiters`.
    pub extra_limiters: Vec<RateLimiter>,
    pub session_open_limits: OpenLimits,
    pub(super) session_count_limiter: LimitedCopiesCounter,
    pub(super) extra_session_count_limiters: Vec<LimitedCopiesCounter>,
    invalidated: tokio::sync::watch::Sender<bool>,
    notifications_count: AtomicU64,
}

impl SharedUser {
    pub fn id(&self) -> Option<Uuid> {
        *self.id.lock().unwrap()
    }

    pub fn is_valid(&self) -> bool {
        self.id().is_some()
    }

    /// Clears the id and wakes every subscriber (spec: "clear id and notify
    /// subscribers ... sessions then close gracefully").
    pub fn invalidate(&self) {
        *self.id.lock().unwrap() = None;
        self.notifications_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.invalidated.send(true);
    }

    pub fn notifications_count(&self) -> u64 {
        self.notifications_count.load(Ordering::SeqCst)
    }

    /// Subscribes to invalidation; resolves once `invalidate()` has been
    /// called (possibly already, if called before this subscription).
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<bool> {
        self.invalidated.subscribe()
    }

    pub fn session_count_limit_reached(&self) -> bool {
        self.session_count_limiter.limit_reached() || self.extra_session_count_limiters.iter().any(|l| l.limit_reached())
    }
}

/// Keyed by user name; holds weak references only, matching
/// `weak_users_map_`'s "strongly held by sessions, weakly by the
/// authenticator" lifecycle (spec §3 `SharedUser` lifecycle).
#[derive(Default)]
pub struct SharedUserRegistry {
    by_name: DashMap<String, Weak<SharedUser>>,
}

impl SharedUserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<SharedUser>> {
        self.by_name.get(name).and_then(|w| w.upgrade())
    }

    pub fn insert(&self, name: &str, su: &Arc<SharedUser>) {
        self.by_name.insert(name.to_string(), Arc::downgrade(su));
    }

    /// Drops registry entries whose weak reference no longer upgrades
    /// (every session released it); mirrors the cleanup pass `update()`
    /// folds into its sweep over `weak_users_map_`.
    pub fn prune_dead(&self) {
        self.by_name.retain(|_, w| w.strong_count() > 0);
    }
}

/// Builds a fresh [`SharedUser`] from a resolved user config, its group
/// chain (closest-first, as `authenticate()` walks `u->groups` and applies
/// `get_or_make_group_limiters` per entry), and the backend appropriate for
/// its impersonation token. Mirrors `update_shared_user`'s limit-tightening
/// pass, minus the actual mount-tree merge (left to the caller, since it
/// needs the authenticator's group table).
pub struct SharedUserBuilder {
    pub name: String,
    pub mount_tree: MountTree,
    pub backend: Arc<dyn Backend>,
    pub impersonation_token: Option<ImpersonationToken>,
    pub session_inbound_limit: u64,
    pub session_outbound_limit: u64,
    pub session_open_limits: OpenLimits,
    pub session_count_limit: usize,
}

impl SharedUserBuilder {
    /// `groups` must already be in the order the original walks them
    /// (`crbegin`/`crend`, i.e. reverse of the user's listed order) so that
    /// earlier-listed groups override later ones, per spec §4.1.
    pub fn build(self, groups: &[(&str, &GroupLimiters, u64, u64, OpenLimits)]) -> SharedUser {
        let limiter = RateLimiter::new(self.session_inbound_limit, self.session_outbound_limit);
        let mut session_inbound = self.session_inbound_limit;
        let mut session_outbound = self.session_outbound_limit;
        let mut open_files = self.session_open_limits.files as u64;
        let mut open_dirs = self.session_open_limits.directories as u64;

        let mut extra_limiters = Vec::with_capacity(groups.len());
        let mut extra_session_count_limiters = Vec::with_capacity(groups.len());

        for (_, gl, g_inbound, g_outbound, g_open) in groups {
            extra_limiters.push(gl.rate_limiter.clone());
            extra_session_count_limiters.push(gl.session_count_limiter.clone());
            tighten(&mut session_inbound, *g_inbound);
            tighten(&mut session_outbound, *g_outbound);
            tighten(&mut open_files, g_open.files as u64);
            tighten(&mut open_dirs, g_open.directories as u64);
        }
        extra_limiters.sort_by_key(|l| l.identity());

        let open_limits = OpenLimits {
            files: open_files.min(u16::MAX as u64) as u16,
            directories: open_dirs.min(u16::MAX as u64) as u16,
        };

        limiter.set_limits(session_inbound, session_outbound);

        let mut session_count_limiter = LimitedCopiesCounter::with_limit(format!("user «{}»", self.name), self.session_count_limit);
        session_count_limiter.set_limit(self.session_count_limit);

        let (tx, _rx) = tokio::sync::watch::channel(false);
        SharedUser {
            id: Mutex::new(Some(Uuid::new_v4())),
            name: self.name,
            mount_tree: self.mount_tree,
            backend: self.backend,
            impersonation_token: self.impersonation_token,
            limiter,
            extra_limiters,
            session_open_limits: open_limits,
            session_count_limiter,
            extra_session_count_limiters,
            invalidated: tx,
            notifications_count: AtomicU64::new(0),
        }
    }
}

/// `0`/unlimited never tightens; otherwise the smaller value wins.
fn tighten(current: &mut u64, other: u64) {
    if other != 0 && (*current == 0 || other < *current) {
        *current = other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvfs::backend::local::LocalBackend;

    fn dummy() -> Arc<SharedUser> {
        let builder = SharedUserBuilder {
            name: "alice".into(),
            mount_tree: MountTree::default(),
            backend: Arc::new(LocalBackend::new()),
            impersonation_token: None,
            session_inbound_limit: 0,
            session_outbound_limit: 0,
            session_open_limits: OpenLimits::default(),
            session_count_limit: 2,
        };
        Arc::new(builder.build(&[]))
    }

    #[test]
    fn invalidate_clears_id_and_notifies() {
        let su = dummy();
        assert!(su.is_valid());
        let mut rx = su.subscribe();
        su.invalidate();
        assert!(!su.is_valid());
        assert!(*rx.borrow_and_update());
        assert_eq!(su.notifications_count(), 1);
    }

    #[test]
    fn registry_drops_entries_once_unreferenced() {
        let registry = SharedUserRegistry::new();
        let su = dummy();
        registry.insert("alice", &su);
        assert!(registry.get("alice").is_some());
        drop(su);
        registry.prune_dead();
        assert!(registry.get("alice").is_none());
    }

    #[test]
    fn group_limit_tightening_never_loosens_with_unlimited() {
        let mut v = 10u64;
        tighten(&mut v, 0);
        assert_eq!(v, 10);
        tighten(&mut v, 5);
        assert_eq!(v, 5);
        let mut unlimited = 0u64;
        tighten(&mut unlimited, 7);
        assert_eq!(unlimited, 7);
    }
}
