//! RAII wrapper a session holds for its authenticated principal (spec §4.1
//! "session quotas", §5). Grounded on `authentication/authenticator.hpp`'s
//! `session_user`: couples a `shared_user` with the per-session count
//! limiters acquired at login, so dropping it releases both the strong
//! reference and the quota in one move.

use std::sync::Arc;

use super::error::AuthError;
use super::shared_user::SharedUser;
use crate::util::LimitedCopiesCounter;

/// Holds a `SharedUser` plus one live clone of its session-count limiter
/// (and of each group's), so construction consumes one unit of quota and
/// `Drop` releases it, matching `CopiesCounter`'s clone-to-increment,
/// drop-to-decrement semantics (spec §4.6).
pub struct SessionUser {
    shared: Option<Arc<SharedUser>>,
    error: Option<AuthError>,
    _session_count: LimitedCopiesCounter,
    _extra_session_counts: Vec<LimitedCopiesCounter>,
}

impl SessionUser {
    /// Binds a session to `shared`, consuming one unit of its (and its
    /// groups') session-count quota. Callers must have already checked
    /// `shared.session_count_limit_reached()` before calling this, the same
    /// way the original checks `limit_reached()` before materializing.
    pub fn bind(shared: Arc<SharedUser>) -> Self {
        let session_count = shared.session_count_limiter.clone();
        let extra_session_counts = shared.extra_session_count_limiters.clone();
        Self {
            shared: Some(shared),
            error: None,
            _session_count: session_count,
            _extra_session_counts: extra_session_counts,
        }
    }

    pub fn rejected(error: AuthError) -> Self {
        Self {
            shared: None,
            error: Some(error),
            _session_count: LimitedCopiesCounter::new(""),
            _extra_session_counts: Vec::new(),
        }
    }

    pub fn error(&self) -> Option<&AuthError> {
        self.error.as_ref()
    }

    pub fn get(&self) -> Option<&Arc<SharedUser>> {
        self.shared.as_ref()
    }

    /// True only once bound to a still-valid principal; an invalidated
    /// `SharedUser` (config mutated it away) makes this false even though
    /// `self.shared` is still `Some`.
    pub fn is_valid(&self) -> bool {
        match &self.shared {
            Some(su) => self.error.is_none() && su.is_valid(),
            None => false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::rejected(AuthError::Internal("session reset".into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::shared_user::SharedUserBuilder;
    use crate::tvfs::backend::local::LocalBackend;
    use crate::tvfs::limits::OpenLimits;
    use crate::tvfs::MountTree;

    fn dummy(limit: usize) -> Arc<SharedUser> {
        Arc::new(
            SharedUserBuilder {
                name: "alice".into(),
                mount_tree: MountTree::default(),
                backend: Arc::new(LocalBackend::new()),
                impersonation_token: None,
                session_inbound_limit: 0,
                session_outbound_limit: 0,
                session_open_limits: OpenLimits::default(),
                session_count_limit: limit,
            }
            .build(&[]),
        )
    }

    #[test]
    fn binding_consumes_quota_and_drop_releases_it() {
        let su = dummy(1);
        assert!(!su.session_count_limit_reached());
        let session = SessionUser::bind(su.clone());
        assert!(su.session_count_limit_reached());
        assert!(session.is_valid());
        drop(session);
        assert!(!su.session_count_limit_reached());
    }

    #[test]
    fn rejected_session_is_never_valid() {
        let session = SessionUser::rejected(AuthError::UserDisabled);
        assert!(!session.is_valid());
        assert_eq!(session.error(), Some(&AuthError::UserDisabled));
    }

    #[test]
    fn invalidated_shared_user_makes_session_invalid() {
        let su = dummy(5);
        let session = SessionUser::bind(su.clone());
        assert!(session.is_valid());
        su.invalidate();
        assert!(!session.is_valid());
    }
}
