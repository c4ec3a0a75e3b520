//! Method-set narrowing (spec §4.1, §8 property 2, scenario S3).
//!
//! Grounded on `authentication/method.hpp`'s `any_method` variant and its
//! `methods_set`/`available_methods` bitset-of-variants design: rather than
//! tracking which concrete credential satisfied a method, the narrowing
//! machinery only ever needs to know *which kind* of method a set contains,
//! so a small bitset keyed by variant index does the job without needing
//! the credential payloads themselves.

use std::fmt;

/// One authentication method kind an offered credential can satisfy.
///
/// `None` (the do-nothing method, used by the system-user sentinel once its
/// other methods are erased) is kept as a real kind rather than folded into
/// "absence of a method" so that `MethodsSet` can represent "this route
/// requires nothing further" explicitly, matching `method::none` in the
/// original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    None,
    Password,
    Token,
}

const METHOD_COUNT: usize = 3;

impl AuthMethod {
    fn bit(self) -> usize {
        match self {
            AuthMethod::None => 0,
            AuthMethod::Password => 1,
            AuthMethod::Token => 2,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthMethod::None => "none",
            AuthMethod::Password => "password",
            AuthMethod::Token => "token",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AuthMethod::None),
            "password" => Ok(AuthMethod::Password),
            "token" => Ok(AuthMethod::Token),
            other => Err(format!("unknown auth method '{other}'")),
        }
    }
}

/// A set of method kinds, backed by a small bitset.
///
/// `methods_set` in the original excludes `none`'s bit entirely (its index
/// is 0 and reserved); `count()`/`has()` of `None` there degenerate to "is
/// the set empty". We keep the same convention: `None` is representable as
/// a method but never sets a bit of its own, so an empty `MethodsSet` and a
/// `MethodsSet` containing only `None` are indistinguishable, exactly as in
/// the original bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodsSet {
    bits: u64,
}

impl MethodsSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_methods(methods: impl IntoIterator<Item = AuthMethod>) -> Self {
        let mut set = Self::default();
        for m in methods {
            set.add(m);
        }
        set
    }

    pub fn add(&mut self, m: AuthMethod) {
        let i = m.bit();
        if i > 0 {
            self.bits |= 1 << (i - 1);
        }
    }

    pub fn erase(&mut self, m: AuthMethod) {
        let i = m.bit();
        if i > 0 {
            self.bits &= !(1 << (i - 1));
        }
    }

    pub fn has(&self, m: AuthMethod) -> bool {
        let i = m.bit();
        if i > 0 {
            self.bits & (1 << (i - 1)) != 0
        } else {
            self.bits == 0
        }
    }

    pub fn intersect(&self, other: &MethodsSet) -> MethodsSet {
        MethodsSet { bits: self.bits & other.bits }
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn to_u64(&self) -> u64 {
        self.bits
    }

    pub fn from_u64(v: u64) -> Self {
        Self { bits: v & ((1 << (METHOD_COUNT - 1)) - 1) }
    }
}

/// An ordered list of alternative [`MethodsSet`]s: each element is one
/// complete "route" to finishing authentication, and narrowing picks among
/// them as methods get verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableMethods(Vec<MethodsSet>);

impl AvailableMethods {
    pub fn new(sets: impl IntoIterator<Item = MethodsSet>) -> Self {
        Self(sets.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn sets(&self) -> &[MethodsSet] {
        &self.0
    }

    /// Returns the subset of routes that are a superset of `set`'s bits,
    /// i.e. could still be completed by additionally verifying whatever
    /// `set` doesn't already cover.
    pub fn filter(&self, set: &MethodsSet) -> AvailableMethods {
        AvailableMethods(
            self.0
                .iter()
                .filter(|route| route.intersect(set) == *set)
                .copied()
                .collect(),
        )
    }

    /// True if some route is exactly `set`.
    pub fn has(&self, set: &MethodsSet) -> bool {
        self.0.iter().any(|route| route == set)
    }

    /// True if every method in `set` appears in at least one route.
    pub fn can_verify(&self, set: &MethodsSet) -> bool {
        self.0.iter().any(|route| route.intersect(set) == *set)
    }

    /// Removes all routes that match `set` exactly. Returns whether any
    /// removal happened.
    pub fn remove(&mut self, set: &MethodsSet) -> bool {
        let before = self.0.len();
        self.0.retain(|route| route != set);
        self.0.len() != before
    }

    /// Erases `method` from every route, then drops routes that no longer
    /// contain it (those routes picked a different method to verify it, so
    /// once we've verified `method` ourselves they're no longer reachable).
    ///
    /// Returns whether authentication is still necessary afterward.
    pub fn set_verified(&mut self, method: AuthMethod) -> bool {
        self.0.retain_mut(|route| {
            let contained = route.has(method);
            if contained {
                route.erase(method);
            }
            contained
        });
        self.is_auth_necessary()
    }

    /// True if at least one non-empty route remains, i.e. some further
    /// method still needs verifying.
    pub fn is_auth_necessary(&self) -> bool {
        self.0.iter().any(|route| !route.is_empty())
    }

    /// True if any route remains at all (empty or not); false means every
    /// route was eliminated and authentication cannot succeed.
    pub fn is_auth_possible(&self) -> bool {
        !self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(methods: &[AuthMethod]) -> MethodsSet {
        MethodsSet::from_methods(methods.iter().copied())
    }

    #[test]
    fn narrowing_scenario_s3() {
        let mut available = AvailableMethods::new([
            set(&[AuthMethod::Password, AuthMethod::Token]),
            set(&[AuthMethod::Password]),
        ]);

        assert!(available.set_verified(AuthMethod::Password));
        assert_eq!(available.sets(), &[set(&[AuthMethod::Token])]);
        assert!(available.is_auth_necessary());

        assert!(!available.set_verified(AuthMethod::Token));
        assert_eq!(available.sets(), &[set(&[])]);
        assert!(!available.is_auth_necessary());
        assert!(available.is_auth_possible());
    }

    #[test]
    fn method_not_supported_when_no_route_survives() {
        let mut available = AvailableMethods::new([set(&[AuthMethod::Token])]);
        assert!(!available.set_verified(AuthMethod::Password));
        assert!(!available.is_auth_possible());
    }

    #[test]
    fn can_verify_checks_membership_across_routes() {
        let available = AvailableMethods::new([
            set(&[AuthMethod::Password]),
            set(&[AuthMethod::Token]),
        ]);
        assert!(available.can_verify(&set(&[AuthMethod::Password])));
        assert!(available.can_verify(&set(&[AuthMethod::Token])));
    }

    #[test]
    fn filter_keeps_only_routes_containing_the_given_set() {
        let available = AvailableMethods::new([
            set(&[AuthMethod::Password, AuthMethod::Token]),
            set(&[AuthMethod::Token]),
        ]);
        let filtered = available.filter(&set(&[AuthMethod::Password]));
        assert_eq!(filtered.sets(), &[set(&[AuthMethod::Password, AuthMethod::Token])]);
    }

    #[test]
    fn round_trips_through_u64() {
        let s = set(&[AuthMethod::Password, AuthMethod::Token]);
        assert_eq!(MethodsSet::from_u64(s.to_u64()), s);
    }
}
