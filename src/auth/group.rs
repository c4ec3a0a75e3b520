//! Group configuration entries (spec §3 `Group`).

use crate::tvfs::MountTable;
use crate::util::RateLimiter;

pub const INVALID_CHARS_IN_NAME: &str = "\0\r\n\t";

/// Rate limits a group or user can carry; `0` means unlimited, as
/// everywhere else in this crate's limit types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimits {
    pub inbound: u64,
    pub outbound: u64,
    pub session_inbound: u64,
    pub session_outbound: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub description: String,
    pub mount_table: MountTable,
    pub rate_limits: RateLimits,
    pub session_count_limit: usize,
    pub allowed_ips: Vec<String>,
    pub disallowed_ips: Vec<String>,
}

impl Group {
    pub fn has_invalid_name(&self) -> bool {
        self.name.is_empty() || self.name.contains(|c: char| INVALID_CHARS_IN_NAME.contains(c))
    }
}

/// Live, shared limiters for one group, handed out to every `SharedUser`
/// referencing it (original `file_based_authenticator::group_limiters`).
#[derive(Clone)]
pub struct GroupLimiters {
    pub rate_limiter: RateLimiter,
    pub session_count_limiter: crate::util::LimitedCopiesCounter,
}

impl GroupLimiters {
    pub fn new(name: &str) -> Self {
        Self {
            rate_limiter: RateLimiter::unlimited(),
            session_count_limiter: crate::util::LimitedCopiesCounter::new(format!("group «{name}»")),
        }
    }

    pub fn update(&mut self, g: &Group) {
        self.rate_limiter.set_limits(g.rate_limits.inbound, g.rate_limits.outbound);
        self.session_count_limiter.set_limit(g.session_count_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_control_char_names() {
        let mut g = Group::default();
        assert!(g.has_invalid_name());
        g.name = "staff".into();
        assert!(!g.has_invalid_name());
        g.name = "sta\0ff".into();
        assert!(g.has_invalid_name());
    }
}
