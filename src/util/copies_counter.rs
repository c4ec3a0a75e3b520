//! A value whose clones count how many copies of themselves are alive.
//!
//! Mirrors `fz::util::copies_counter`: the count is literally the strong
//! count of a shared, named handle minus one, so incrementing/decrementing
//! falls out of ordinary `Clone`/`Drop` rather than explicit bookkeeping.

use std::sync::Arc;

/// A named, cloneable handle that reports how many live copies of itself exist.
#[derive(Clone)]
pub struct CopiesCounter {
    name: Option<Arc<str>>,
}

impl Default for CopiesCounter {
    fn default() -> Self {
        Self::new("")
    }
}

impl CopiesCounter {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            name: if name.is_empty() {
                None
            } else {
                Some(Arc::from(name))
            },
        }
    }

    /// Number of live copies, including this one.
    pub fn count(&self) -> usize {
        match &self.name {
            Some(arc) => Arc::strong_count(arc) - 1,
            // An unnamed counter carries no shared state; every copy counts
            // as one of itself, so report 1 to indicate "this one is alive".
            None => 1,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// A [`CopiesCounter`] that additionally carries an optional cap.
#[derive(Clone)]
pub struct LimitedCopiesCounter {
    inner: CopiesCounter,
    limit: usize,
}

impl LimitedCopiesCounter {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            inner: CopiesCounter::new(name),
            limit: 0,
        }
    }

    pub fn with_limit(name: impl AsRef<str>, limit: usize) -> Self {
        Self {
            inner: CopiesCounter::new(name),
            limit,
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn count(&self) -> usize {
        self.inner.count()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// `0` means unlimited, matching the `unlimited` sentinel used
    /// throughout the rate/session-limit configuration types.
    pub fn limit_reached(&self) -> bool {
        self.limit != 0 && self.limit <= self.count()
    }

    /// Tightens `self`'s limit to the smaller of the two; an unlimited (0)
    /// limit never tightens an existing one.
    pub fn tighten(&mut self, other_limit: usize) {
        self.limit = match (self.limit, other_limit) {
            (0, o) => o,
            (l, 0) => l,
            (l, o) => l.min(o),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tracks_live_clones() {
        let a = CopiesCounter::new("sessions");
        assert_eq!(a.count(), 1);
        let b = a.clone();
        assert_eq!(a.count(), 2);
        drop(b);
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn limit_reached_respects_unlimited_sentinel() {
        let mut a = LimitedCopiesCounter::with_limit("per-user", 2);
        assert!(!a.limit_reached());
        let b = a.clone();
        assert!(a.limit_reached());
        drop(b);
        assert!(!a.limit_reached());

        a.set_limit(0);
        let _c = a.clone();
        let _d = a.clone();
        assert!(!a.limit_reached());
    }

    #[test]
    fn tighten_keeps_smaller_nonzero_value() {
        let mut a = LimitedCopiesCounter::with_limit("x", 10);
        a.tighten(4);
        assert_eq!(a.limit(), 4);
        a.tighten(0);
        assert_eq!(a.limit(), 4);

        let mut unlimited = LimitedCopiesCounter::with_limit("y", 0);
        unlimited.tighten(0);
        assert_eq!(unlimited.limit(), 0);
        unlimited.tighten(7);
        assert_eq!(unlimited.limit(), 7);
    }
}
