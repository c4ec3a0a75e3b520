//! Per-user credential storage and verification (spec §3 `User.credentials`,
//! §4.1 "method verification"). Grounded on `authentication/credentials.hpp`/
//! `.cpp` and the `any_password`/`default_password` upgrade-in-place
//! behavior referenced from `file_based_authenticator.cpp`.

use rand::RngCore;
use sha2::{Digest, Sha256};

use super::method::{AuthMethod, AvailableMethods, MethodsSet};

/// The token handed to the OS impersonation layer once credentials
/// authorize filesystem access as a non-default OS user (spec §3
/// `ImpersonationToken`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonationToken {
    pub os_user: String,
    /// Required on Windows; POSIX impersonation is password-less.
    pub password: Option<String>,
    pub group: Option<String>,
    /// A login-only token only proves identity; it does not govern which
    /// OS user subsequent filesystem I/O runs as.
    pub login_only: bool,
}

/// A password, either carried over verbatim from an old config (`Plain`) or
/// salted and hashed the way newly-set or upgraded passwords are stored
/// (`Salted`, the "default" kind `file_based_authenticator.cpp` converts
/// legacy passwords into on first successful login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyPassword {
    Plain(String),
    Salted { salt: [u8; 16], hash: [u8; 32] },
}

impl AnyPassword {
    pub fn default_password(plain: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        Self::salted_with(salt, plain)
    }

    fn salted_with(salt: [u8; 16], plain: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(plain.as_bytes());
        let hash: [u8; 32] = hasher.finalize().into();
        AnyPassword::Salted { salt, hash }
    }

    pub fn is_default_kind(&self) -> bool {
        matches!(self, AnyPassword::Salted { .. })
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            AnyPassword::Plain(p) => p == candidate,
            AnyPassword::Salted { salt, hash } => {
                if let AnyPassword::Salted { hash: candidate_hash, .. } = Self::salted_with(*salt, candidate) {
                    &candidate_hash == hash
                } else {
                    false
                }
            }
        }
    }
}

/// A password credential, optionally bound to an OS impersonation target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PasswordWithImpersonation {
    pub password: Option<AnyPassword>,
    pub impersonation: Option<ImpersonationToken>,
}

impl PasswordWithImpersonation {
    pub fn is_set(&self) -> bool {
        self.password.is_some()
    }

    fn verify(&self, candidate: &str) -> Option<ImpersonationToken> {
        match &self.password {
            Some(p) if p.matches(candidate) => Some(
                self.impersonation
                    .clone()
                    .unwrap_or(ImpersonationToken { os_user: String::new(), password: None, group: None, login_only: true }),
            ),
            _ => None,
        }
    }
}

/// The stored credential set for one user; currently only password-based,
/// mirroring the original's single `password` member (token credentials are
/// verified against the webui token DB, a separate path from this store).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub password: PasswordWithImpersonation,
}

/// Outcome of [`Credentials::verify`]: whether the offered method matched,
/// and the impersonation token it yielded, if any.
pub struct VerifyOutcome {
    pub success: bool,
    pub impersonation: Option<ImpersonationToken>,
    /// Set when verification succeeded via a non-default password kind, so
    /// the caller can upgrade it in place and mark the store dirty.
    pub upgrade_to: Option<AnyPassword>,
}

impl Credentials {
    /// Verifies one offered method. Conflicting impersonation tokens (more
    /// than one method producing one) are a caller bug in the original;
    /// here they simply can't arise since only `password` yields a token.
    pub fn verify(&self, method: &AuthMethod, candidate_password: Option<&str>) -> VerifyOutcome {
        match method {
            AuthMethod::Password => {
                let Some(candidate) = candidate_password else {
                    return VerifyOutcome { success: false, impersonation: None, upgrade_to: None };
                };
                match self.password.verify(candidate) {
                    Some(token) => {
                        let upgrade_to = match &self.password.password {
                            Some(p) if !p.is_default_kind() => Some(AnyPassword::default_password(candidate)),
                            _ => None,
                        };
                        VerifyOutcome { success: true, impersonation: Some(token), upgrade_to }
                    }
                    None => VerifyOutcome { success: false, impersonation: None, upgrade_to: None },
                }
            }
            AuthMethod::Token | AuthMethod::None => {
                VerifyOutcome { success: false, impersonation: None, upgrade_to: None }
            }
        }
    }

    pub fn is_valid_for(&self, methods: &AvailableMethods) -> bool {
        if methods.is_auth_necessary() {
            let password_required = MethodsSet::from_methods([AuthMethod::Password]);
            if methods.can_verify(&password_required) && !self.password.is_set() {
                return false;
            }
        }
        true
    }

    /// The most-secure method set derivable purely from what credentials
    /// are actually set, used to default a user's `methods` list when it's
    /// empty or unrealizable (spec §4.1 sanitization).
    pub fn most_secure_methods(&self) -> AvailableMethods {
        let mut ms = MethodsSet::new();
        if self.password.is_set() {
            ms.add(AuthMethod::Password);
        }
        AvailableMethods::new([ms])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_password_verifies_and_flags_upgrade() {
        let creds = Credentials {
            password: PasswordWithImpersonation { password: Some(AnyPassword::Plain("hunter2".into())), impersonation: None },
        };
        let outcome = creds.verify(&AuthMethod::Password, Some("hunter2"));
        assert!(outcome.success);
        assert!(outcome.upgrade_to.is_some());
    }

    #[test]
    fn salted_password_verifies_without_upgrade() {
        let creds = Credentials {
            password: PasswordWithImpersonation { password: Some(AnyPassword::default_password("hunter2")), impersonation: None },
        };
        let outcome = creds.verify(&AuthMethod::Password, Some("hunter2"));
        assert!(outcome.success);
        assert!(outcome.upgrade_to.is_none());

        let wrong = creds.verify(&AuthMethod::Password, Some("wrong"));
        assert!(!wrong.success);
    }

    #[test]
    fn is_valid_for_requires_password_when_only_route_needs_it() {
        let empty = Credentials::default();
        let methods = AvailableMethods::new([MethodsSet::from_methods([AuthMethod::Password])]);
        assert!(!empty.is_valid_for(&methods));

        let with_pw = Credentials {
            password: PasswordWithImpersonation { password: Some(AnyPassword::Plain("x".into())), impersonation: None },
        };
        assert!(with_pw.is_valid_for(&methods));
    }

    #[test]
    fn most_secure_methods_reflects_what_is_set() {
        let none = Credentials::default();
        assert!(!none.most_secure_methods().is_auth_possible() || !none.most_secure_methods().sets()[0].has(AuthMethod::Password));

        let with_pw = Credentials {
            password: PasswordWithImpersonation { password: Some(AnyPassword::Plain("x".into())), impersonation: None },
        };
        assert!(with_pw.most_secure_methods().sets()[0].has(AuthMethod::Password));
    }
}
