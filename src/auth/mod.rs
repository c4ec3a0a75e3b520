//! Authentication and authorization (spec §4.1).
//!
//! Grounded on `authentication/file_based_authenticator.cpp`'s
//! `worker::authenticate` state sequence (user resolution, IP gate, method
//! verification, narrowing, finalization into a `shared_user`). The
//! original drives this through an event-loop callback chain
//! (`authenticator::operation`); this port collapses that into an explicit
//! two-step async state machine (`Authenticator::begin` /
//! `Worker::verify`) per the "callback-chained operations" design note,
//! since `async`/`await` already gives each step a suspension point without
//! needing a boxed continuation per round-trip.

pub mod credentials;
pub mod error;
pub mod group;
pub mod method;
pub mod session_user;
pub mod shared_user;
pub mod store;
pub mod throttle;
pub mod user;

pub use credentials::{AnyPassword, Credentials, ImpersonationToken, PasswordWithImpersonation};
pub use error::AuthError;
pub use group::Group;
pub use method::{AuthMethod, AvailableMethods, MethodsSet};
pub use session_user::SessionUser;
pub use shared_user::{SharedUser, SharedUserRegistry};
pub use store::{Store, StoreError};
pub use throttle::{Autobanner, AutobannerConfig, ThrottledAuthenticator, ThrottledStep, ThrottledWorker};
pub use user::User;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

use crate::impersonator::Pool;
use crate::tvfs::backend::impersonated::ImpersonatedBackend;
use crate::tvfs::backend::local::LocalBackend;
use crate::tvfs::mount::MountFlags;
use crate::tvfs::{Backend, MountTree, NativeFormat, Node};
use crate::util::tools::ip_matches_any;
use group::GroupLimiters;
use shared_user::SharedUserBuilder;

struct Inner {
    store: AsyncMutex<Store>,
    registry: SharedUserRegistry,
    group_limiters: Mutex<HashMap<String, GroupLimiters>>,
    impersonator_pool: Option<Arc<Pool>>,
    host: NativeFormat,
}

/// Owns the group/user store and the registry of live `SharedUser`s;
/// cheap to clone, since every clone shares the same state (mirrors the
/// original's single `file_based_authenticator` instance, referenced by
/// every per-connection `worker`).
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

/// Resolved but not-yet-finalized identity a [`Worker`] is chasing: the
/// store key to re-look-up the user under (a temp user's own name, or the
/// system sentinel's reserved name, never the raw name offered at login).
struct Resolution {
    key: String,
}

/// One in-flight authentication attempt-chain, scoped to a single
/// connection (spec §4.1 "Worker"). Not `Clone`/`Send`-shared: a session
/// owns exactly one at a time, matching the original's one-`worker`-
/// per-attempt-chain lifetime.
pub struct Worker {
    authenticator: Authenticator,
    resolution: Resolution,
    peer_ip: IpAddr,
    available: AvailableMethods,
    impersonation_token: Option<ImpersonationToken>,
}

/// One step of the state machine in spec §4.1's diagram.
pub enum AuthStep {
    Reject(AuthError),
    Propose(AvailableMethods),
    Success(SessionUser),
}

impl Authenticator {
    pub fn new(store: Store, impersonator_pool: Option<Arc<Pool>>, host: NativeFormat) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: AsyncMutex::new(store),
                registry: SharedUserRegistry::new(),
                group_limiters: Mutex::new(HashMap::new()),
                impersonator_pool,
                host,
            }),
        }
    }

    pub async fn add_user(&self, name: String, u: User) -> bool {
        self.inner.store.lock().await.add_user(name, u)
    }

    pub async fn remove_user(&self, name: &str) -> bool {
        let mut store = self.inner.store.lock().await;
        let removed = store.remove_user(name);
        if removed {
            self.invalidate_shared_user(name);
        }
        removed
    }

    fn invalidate_shared_user(&self, name: &str) {
        if let Some(su) = self.inner.registry.get(name) {
            su.invalidate();
        }
        self.inner.registry.prune_dead();
    }

    /// Starts an attempt chain: resolves the user, checks enabled/IP gate,
    /// and returns the initial available-methods set (or a rejection).
    /// Corresponds to the original's `authenticate()` call with an empty
    /// `methods_list`.
    pub async fn begin(&self, name: &str, peer_ip: IpAddr) -> (Worker, AuthStep) {
        let store = self.inner.store.lock().await;

        let (key, user) = if let Some(u) = store.users.get(name) {
            (name.to_string(), Some(u))
        } else if let Some(u) = store.temp_users.get(name) {
            (name.to_string(), Some(u))
        } else if let Some(u) = store.users.get(user::SYSTEM_USER_NAME) {
            if u.enabled {
                (user::SYSTEM_USER_NAME.to_string(), Some(u))
            } else {
                (name.to_string(), None)
            }
        } else {
            (name.to_string(), None)
        };

        let resolution = Resolution { key: key.clone() };
        let worker = Worker {
            authenticator: self.clone(),
            resolution,
            peer_ip,
            available: AvailableMethods::none(),
            impersonation_token: None,
        };

        let Some(user) = user else {
            return (worker, AuthStep::Reject(AuthError::UserNonexisting));
        };
        if !user.enabled {
            return (worker, AuthStep::Reject(AuthError::UserDisabled));
        }
        if !user.credentials.is_valid_for(&user.methods) {
            error!(user = key.as_str(), "auth methods do not match credentials, this is a configuration bug");
            return (worker, AuthStep::Reject(AuthError::Internal("auth methods do not match credentials".into())));
        }

        if self.ip_disallowed(&store, user, peer_ip) {
            return (worker, AuthStep::Reject(AuthError::IpDisallowed));
        }

        let mut worker = worker;
        worker.available = user.methods.clone();
        (worker, AuthStep::Propose(user.methods.clone()))
    }

    fn ip_disallowed(&self, store: &Store, user: &User, peer_ip: IpAddr) -> bool {
        let mut disallowed = ip_matches_any(&user.disallowed_ips, peer_ip)
            || user.groups.iter().any(|g| store.groups.get(g).is_some_and(|g| ip_matches_any(&g.disallowed_ips, peer_ip)));

        if disallowed {
            let excepted = ip_matches_any(&user.allowed_ips, peer_ip)
                || user.groups.iter().any(|g| store.groups.get(g).is_some_and(|g| ip_matches_any(&g.allowed_ips, peer_ip)));
            if excepted {
                disallowed = false;
            }
        }
        disallowed
    }

    /// Finalizes a successful attempt-chain into a live `SharedUser`
    /// (original's "acquire or create a shared_user" + session quotas).
    async fn materialize(&self, resolution: &Resolution, impersonation_token: Option<ImpersonationToken>) -> Result<SessionUser, AuthError> {
        let store = self.inner.store.lock().await;

        let impersonation_token = match impersonation_token {
            Some(t) => Some(t),
            None => store.default_impersonator.get_token(),
        };

        if impersonation_token.is_some() && self.inner.impersonator_pool.is_none() {
            return Err(AuthError::Internal(
                "filesystem impersonation requested but no impersonator executable is configured".into(),
            ));
        }

        if let Some(existing) = self.inner.registry.get(&resolution.key) {
            if existing.impersonation_token != impersonation_token {
                existing.invalidate();
            } else {
                if existing.session_count_limit_reached() {
                    return Err(AuthError::UserQuotaReached);
                }
                return Ok(SessionUser::bind(existing));
            }
        }

        let user = store
            .users
            .get(&resolution.key)
            .or_else(|| store.temp_users.get(&resolution.key))
            .ok_or(AuthError::UserNonexisting)?
            .clone();

        let backend: Arc<dyn Backend> = match (&impersonation_token, &self.inner.impersonator_pool) {
            (Some(token), Some(pool)) if !token.login_only => Arc::new(ImpersonatedBackend::new(pool.clone(), token.os_user.clone())),
            _ => Arc::new(LocalBackend::new()),
        };

        let mut mount_tree = MountTree::new();
        let placeholders = crate::tvfs::placeholders::PlaceholderMap::new();
        mount_tree.merge_with(&user.mount_table, &placeholders, self.inner.host);

        let mut group_refs = Vec::new();
        let mut group_limiters_guard = self.inner.group_limiters.lock().unwrap();
        for gname in user.groups.iter().rev() {
            if let Some(g) = store.groups.get(gname) {
                mount_tree.merge_with(&g.mount_table, &placeholders, self.inner.host);
                let limiters = group_limiters_guard.entry(gname.clone()).or_insert_with(|| GroupLimiters::new(gname));
                limiters.update(g);
                group_refs.push((
                    gname.as_str(),
                    limiters.clone(),
                    g.rate_limits.session_inbound,
                    g.rate_limits.session_outbound,
                    crate::tvfs::limits::OpenLimits::default(),
                ));
            }
        }
        drop(group_limiters_guard);

        let builder = SharedUserBuilder {
            name: resolution.key.clone(),
            mount_tree,
            backend: backend.clone(),
            impersonation_token,
            session_inbound_limit: user.rate_limits.session_inbound,
            session_outbound_limit: user.rate_limits.session_outbound,
            session_open_limits: user.open_limits,
            session_count_limit: user.session_count_limit,
        };
        let refs: Vec<_> = group_refs.iter().map(|(n, l, i, o, ol)| (*n, l, *i, *o, *ol)).collect();
        let shared = Arc::new(builder.build(&refs));

        if shared.session_count_limit_reached() {
            return Err(AuthError::UserQuotaReached);
        }

        autocreate_directories(shared.mount_tree.root(), backend.as_ref()).await;

        self.inner.registry.insert(&resolution.key, &shared);
        Ok(SessionUser::bind(shared))
    }
}

async fn autocreate_directories(node: &Node, backend: &dyn Backend) {
    if node.flags.contains(MountFlags::AUTOCREATE) {
        if let Some(target) = &node.target {
            if let Err(e) = backend.mkdir(target, true, crate::tvfs::backend::MkdirPermissions::Normal).await {
                warn!(path = target.as_str(), error = %e, "failed to autocreate mounted directory");
            }
        }
    }
    for (_, child) in &node.children {
        Box::pin(autocreate_directories(child, backend)).await;
    }
}

impl Worker {
    /// Verifies one batch of methods (all must succeed), narrows
    /// `available`, and either proposes what remains or finalizes
    /// (original's `operation::next` / `worker::authenticate` continuation).
    /// `just_verify` methods (e.g. re-checks with no narrowing effect) don't
    /// erase from `available` on success, matching `methods_list::just_verify()`.
    pub async fn verify(mut self, offered: &[(AuthMethod, Option<String>)], just_verify: bool) -> AuthStep {
        let store = self.authenticator.inner.store.lock().await;
        let user = store
            .users
            .get(&self.resolution.key)
            .or_else(|| store.temp_users.get(&self.resolution.key));
        let Some(user) = user else {
            return AuthStep::Reject(AuthError::UserNonexisting);
        };

        let requested: MethodsSet = MethodsSet::from_methods(offered.iter().map(|(m, _)| *m));
        if !self.available.can_verify(&requested) {
            return AuthStep::Reject(AuthError::AuthMethodNotSupported);
        }

        if self.available.is_auth_necessary() {
            for (method, candidate) in offered {
                let outcome = user.credentials.verify(method, candidate.as_deref());
                if !outcome.success {
                    return AuthStep::Reject(AuthError::InvalidCredentials);
                }
                if let Some(token) = outcome.impersonation {
                    if self.impersonation_token.is_some() {
                        error!(user = self.resolution.key.as_str(), "conflicting impersonation tokens from multiple methods");
                        return AuthStep::Reject(AuthError::Internal("conflicting impersonation tokens".into()));
                    }
                    self.impersonation_token = if token.login_only { None } else { Some(token) };
                }
            }

            if !just_verify {
                for (method, _) in offered {
                    self.available.set_verified(*method);
                }
            }
        }
        drop(store);

        if self.available.is_auth_necessary() {
            return AuthStep::Propose(self.available.clone());
        }

        match self.authenticator.materialize(&self.resolution, self.impersonation_token.clone()).await {
            Ok(session) => AuthStep::Success(session),
            Err(e) => AuthStep::Reject(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store_with_password_user() -> Store {
        let mut store = Store::default();
        let mut u = User { name: "alice".into(), enabled: true, ..Default::default() };
        u.credentials.password.password = Some(AnyPassword::default_password("hunter2"));
        u.methods = AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]);
        store.users.insert("alice".into(), u);
        store.sanitize();
        store
    }

    #[tokio::test]
    async fn s1_basic_password_login_no_impersonation() {
        let authenticator = Authenticator::new(make_store_with_password_user(), None, NativeFormat::Posix);
        let (worker, step) = authenticator.begin("alice", "192.0.2.1".parse().unwrap()).await;
        assert!(matches!(step, AuthStep::Propose(_)));

        let step = worker
            .verify(&[(AuthMethod::Password, Some("hunter2".to_string()))], false)
            .await;
        match step {
            AuthStep::Success(session) => {
                assert!(session.is_valid());
                assert!(session.get().unwrap().impersonation_token.is_none());
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn s2_ip_denied_unless_excepted() {
        let mut store = Store::default();
        let mut u = User { name: "bob".into(), enabled: true, ..Default::default() };
        u.disallowed_ips = vec!["192.0.2.0/24".to_string()];
        u.allowed_ips = vec!["192.0.2.7".to_string()];
        u.credentials.password.password = Some(AnyPassword::default_password("x"));
        store.users.insert("bob".into(), u);
        store.sanitize();

        let authenticator = Authenticator::new(store, None, NativeFormat::Posix);

        let (_, step) = authenticator.begin("bob", "192.0.2.1".parse().unwrap()).await;
        assert!(matches!(step, AuthStep::Reject(AuthError::IpDisallowed)));

        let (_, step) = authenticator.begin("bob", "192.0.2.7".parse().unwrap()).await;
        assert!(matches!(step, AuthStep::Propose(_)));
    }

    #[tokio::test]
    async fn invalid_password_is_rejected() {
        let authenticator = Authenticator::new(make_store_with_password_user(), None, NativeFormat::Posix);
        let (worker, _) = authenticator.begin("alice", "192.0.2.1".parse().unwrap()).await;
        let step = worker.verify(&[(AuthMethod::Password, Some("wrong".to_string()))], false).await;
        assert!(matches!(step, AuthStep::Reject(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn nonexisting_user_without_system_sentinel_is_rejected() {
        let authenticator = Authenticator::new(Store::default(), None, NativeFormat::Posix);
        let (_, step) = authenticator.begin("ghost", "192.0.2.1".parse().unwrap()).await;
        assert!(matches!(step, AuthStep::Reject(AuthError::UserNonexisting)));
    }

    #[tokio::test]
    async fn session_quota_fairness_n_plus_one_fails() {
        let mut store = Store::default();
        let mut u = User { name: "alice".into(), enabled: true, session_count_limit: 1, ..Default::default() };
        u.credentials.password.password = Some(AnyPassword::default_password("hunter2"));
        u.methods = AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]);
        store.users.insert("alice".into(), u);
        store.sanitize();

        let authenticator = Authenticator::new(store, None, NativeFormat::Posix);

        let (worker, _) = authenticator.begin("alice", "192.0.2.1".parse().unwrap()).await;
        let first = worker.verify(&[(AuthMethod::Password, Some("hunter2".to_string()))], false).await;
        let _session = match first {
            AuthStep::Success(s) => s,
            _ => panic!("expected success"),
        };

        let (worker2, _) = authenticator.begin("alice", "192.0.2.1".parse().unwrap()).await;
        let second = worker2.verify(&[(AuthMethod::Password, Some("hunter2".to_string()))], false).await;
        assert!(matches!(second, AuthStep::Reject(AuthError::UserQuotaReached)));
    }
}
