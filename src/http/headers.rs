//! Header collection and the handful of header-driven helpers the ACME
//! client needs (spec §4.4, §6). Grounded on `http/headers.{hpp,cpp}`:
//! kept as an ordered multimap rather than `std::map` so repeated
//! `Set-Cookie`-style headers survive, with the same well-known name
//! constants and `Retry-After`/cookie helpers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Well-known header names, matching the constants `headers` carries in
/// the original.
pub mod name {
    pub const ACCEPT: &str = "Accept";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const COOKIE: &str = "Cookie";
    pub const HOST: &str = "Host";
    pub const LOCATION: &str = "Location";
    pub const RETRY_AFTER: &str = "Retry-After";
    pub const SET_COOKIE: &str = "Set-Cookie";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const USER_AGENT: &str = "User-Agent";
    pub const DATE: &str = "Date";
    pub const REPLAY_NONCE: &str = "Replay-Nonce";
    /// Internal-namespace prefix; a client sending one of these is rejected
    /// at ingress (spec §4.4), but this crate may emit them itself.
    pub const X_FZ_INT_PREFIX: &str = "X-FZ-INT-";
}

/// An ordered collection of header name/value pairs. Unlike `std::map` in
/// the original, duplicate names (e.g. multiple `Set-Cookie`) are kept
/// rather than overwritten; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Retry-After`, accepting either RFC822 or an integer seconds count.
    pub fn get_retry_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let raw = self.get(name::RETRY_AFTER)?;
        if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        raw.trim()
            .parse::<i64>()
            .ok()
            .map(|secs| now + ChronoDuration::seconds(secs))
    }

    /// Same as [`Self::get_retry_at`] but clamped to be no sooner than
    /// `min_seconds_later` from now.
    pub fn get_retry_at_with_min_delay(&self, min_seconds_later: i64) -> DateTime<Utc> {
        let now = Utc::now();
        let later = now + ChronoDuration::seconds(min_seconds_later);
        match self.get_retry_at(now) {
            Some(at) if at >= later => at,
            _ => later,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_keeps_duplicates() {
        let mut h = Headers::new();
        h.insert("Set-Cookie", "a=1");
        h.insert("set-cookie", "b=2");
        assert_eq!(h.get("SET-COOKIE"), Some("a=1"));
        assert_eq!(h.get_all("Set-Cookie").count(), 2);
    }

    #[test]
    fn retry_after_accepts_integer_seconds() {
        let mut h = Headers::new();
        h.insert("Retry-After", "5");
        let now = Utc::now();
        let at = h.get_retry_at(now).unwrap();
        assert!((at - now).num_seconds() >= 4 && (at - now).num_seconds() <= 6);
    }

    #[test]
    fn min_delay_wins_over_an_earlier_retry_after() {
        let mut h = Headers::new();
        h.insert("Retry-After", "0");
        let at = h.get_retry_at_with_min_delay(1);
        assert!(at >= Utc::now());
    }
}
