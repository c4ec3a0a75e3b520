//! Per-user config entries (spec §3 `User`). This is the persisted
//! configuration record (`user_entry` in the original); the live,
//! authenticated handle sessions actually hold is [`super::shared_user::SharedUser`].

use super::credentials::{Credentials, ImpersonationToken};
use super::group::RateLimits;
use super::method::AvailableMethods;
use crate::tvfs::{limits::OpenLimits, MountTable};

pub const INVALID_CHARS_IN_NAME: &str = "\0\r\n\t";

/// The reserved name for the system-user sentinel: always present,
/// impersonation-only, cannot log in with no-auth methods (spec §3 User
/// invariants, §4.1 sanitization).
pub const SYSTEM_USER_NAME: &str = ":s";

#[derive(Debug, Clone, Default)]
pub struct User {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    /// Ordered, de-duplicated on sanitize.
    pub groups: Vec<String>,
    pub credentials: Credentials,
    pub methods: AvailableMethods,
    pub mount_table: MountTable,
    pub rate_limits: RateLimits,
    pub session_count_limit: usize,
    pub open_limits: OpenLimits,
    pub allowed_ips: Vec<String>,
    pub disallowed_ips: Vec<String>,
}

impl User {
    pub fn system_user_default() -> Self {
        let mut u = Self {
            name: SYSTEM_USER_NAME.to_string(),
            description: "This user can impersonate any system user.".to_string(),
            enabled: false,
            ..Default::default()
        };
        u.credentials.password.impersonation = Some(ImpersonationToken {
            os_user: String::new(),
            password: None,
            group: None,
            login_only: false,
        });
        u.mount_table.push(crate::tvfs::mount::MountPoint::new("/", "%<home>"));
        u
    }

    pub fn has_invalid_name(&self, is_system_user: bool) -> bool {
        !is_system_user && (self.name.is_empty() || self.name.contains(|c: char| INVALID_CHARS_IN_NAME.contains(c)))
    }
}

/// The server-wide default OS user filesystem operations run as when a
/// user has no impersonation token of its own (spec §3 `ImpersonationToken`,
/// `file_based_authenticator.cpp`'s `users::impersonator::any`).
#[derive(Debug, Clone, Default)]
pub struct DefaultImpersonator {
    pub enabled: bool,
    pub name: String,
    /// Used on Windows only.
    pub password: Option<String>,
    /// Used on POSIX only.
    pub group: Option<String>,
}

impl DefaultImpersonator {
    pub fn get_token(&self) -> Option<ImpersonationToken> {
        if !self.enabled {
            return None;
        }
        Some(ImpersonationToken {
            os_user: self.name.clone(),
            password: if cfg!(windows) { self.password.clone() } else { None },
            group: if cfg!(windows) { None } else { self.group.clone() },
            login_only: false,
        })
    }

    /// The original resets the default impersonator to `native()` (a
    /// disabled, platform-matching variant) whenever the configured one's
    /// type doesn't belong on this host; here, "native" selection is moot
    /// since there's a single cross-platform shape, so this only ever
    /// clears `enabled`.
    pub fn reset_if_wrong_platform(&mut self) {
        // No platform-specific variant tag to mismatch against in this
        // representation; kept as a no-op hook so sanitize() can still
        // call it unconditionally, matching the original's structure.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_user_is_impersonation_only_and_disabled_by_default() {
        let u = User::system_user_default();
        assert_eq!(u.name, SYSTEM_USER_NAME);
        assert!(!u.enabled);
        assert!(u.credentials.password.impersonation.is_some());
    }

    #[test]
    fn invalid_name_check_exempts_system_user() {
        let mut u = User::default();
        assert!(u.has_invalid_name(false));
        assert!(!u.has_invalid_name(true));
        u.name = "alice".into();
        assert!(!u.has_invalid_name(false));
    }
}
