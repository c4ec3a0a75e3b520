//! Error taxonomy surfaced to authentication callers (spec §7).

use thiserror::Error;

/// Outcome of a failed (or internally broken) authentication attempt.
///
/// `none` from spec.md's literal list isn't a variant here: it denotes
/// "authentication proceeds", i.e. `Ok(_)` at the call site, not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("user is disabled")]
    UserDisabled,
    #[error("no such user")]
    UserNonexisting,
    #[error("peer IP is not allowed to authenticate as this user")]
    IpDisallowed,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("none of the offered methods can be satisfied by this user's credentials")]
    AuthMethodNotSupported,
    #[error("session or open-file quota reached")]
    UserQuotaReached,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for every variant attributable to something the connecting
    /// peer did or is, as opposed to server-side misconfiguration.
    ///
    /// `UserQuotaReached` is explicitly excluded: reaching a quota is a
    /// property of the server's current load, not a credential mistake.
    pub fn is_user_fault(&self) -> bool {
        matches!(
            self,
            AuthError::UserDisabled
                | AuthError::UserNonexisting
                | AuthError::IpDisallowed
                | AuthError::InvalidCredentials
                | AuthError::AuthMethodNotSupported
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_fault_and_internal_partition_the_first_six_variants() {
        let faults = [
            AuthError::UserDisabled,
            AuthError::UserNonexisting,
            AuthError::IpDisallowed,
            AuthError::InvalidCredentials,
            AuthError::AuthMethodNotSupported,
        ];
        for e in faults {
            assert!(e.is_user_fault());
            assert!(!e.is_internal());
        }
        assert!(!AuthError::UserQuotaReached.is_user_fault());
        assert!(!AuthError::UserQuotaReached.is_internal());
        assert!(AuthError::Internal("x".into()).is_internal());
        assert!(!AuthError::Internal("x".into()).is_user_fault());
    }
}
