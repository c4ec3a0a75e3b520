//! Header value parsing: comma-separated lists with `;`-separated
//! parameters, `Accept` q-value matching, and cookie construction (spec
//! §4.4). Grounded on `http/field.{hpp,cpp}`'s `value::list`/
//! `params_list`, simplified from the original's zero-copy view-of-view
//! hierarchy to owned `&str` slicing, which is all a JSON/ACME-oriented
//! client needs.

/// One `,`-separated item of a header value, e.g. `text/html;q=0.8`.
#[derive(Debug, Clone, Copy)]
pub struct ValueItem<'a>(&'a str);

impl<'a> ValueItem<'a> {
    /// The part before the first `;`, trimmed.
    pub fn base(&self) -> &'a str {
        self.0.split(';').next().unwrap_or("").trim()
    }

    pub fn param(&self, key: &str) -> Option<&'a str> {
        self.0.split(';').skip(1).find_map(|p| {
            let (k, v) = p.trim().split_once('=')?;
            k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
        })
    }
}

/// Splits a header value on `,` into its items, skipping empties.
pub fn list_items(value: &str) -> impl Iterator<Item = ValueItem<'_>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ValueItem)
}

/// Picks the best candidate `type/subtype` from `candidates` against an
/// `Accept` header value, honoring `q=` weights and `type/*`/`*/*`
/// wildcards. Ties go to the first listed candidate. A missing or empty
/// `Accept` header accepts the first candidate outright (spec §4.4).
pub fn match_preferred_content_type<'a>(accept: Option<&str>, candidates: &[&'a str]) -> Option<&'a str> {
    let first = *candidates.first()?;
    let accept = match accept {
        Some(a) if !a.trim().is_empty() => a,
        _ => return Some(first),
    };

    let mut best = None;
    let mut best_q = -1.0f32;

    for &candidate in candidates {
        let ty = candidate.split('/').next().unwrap_or(candidate);
        let wildcard = format!("{ty}/*");

        let matched = list_items(accept)
            .find(|item| item.base().eq_ignore_ascii_case(candidate))
            .or_else(|| list_items(accept).find(|item| item.base().eq_ignore_ascii_case(&wildcard)))
            .or_else(|| list_items(accept).find(|item| item.base() == "*/*"));

        let Some(item) = matched else { continue };
        let q: f32 = item.param("q").and_then(|q| q.parse().ok()).unwrap_or(1.0);

        if q > best_q {
            best_q = q;
            best = Some(candidate);
        }
    }

    best
}

/// Builds a `Set-Cookie` value. Order matches the original:
/// name=value, Path, Secure, HttpOnly, Max-Age, SameSite=Strict.
pub fn make_cookie(
    name: &str,
    value: &str,
    path: &str,
    secure: bool,
    http_only: bool,
    max_age: Option<std::time::Duration>,
) -> String {
    let mut s = String::new();
    if secure {
        s.push_str("__Secure-");
    }
    s.push_str(name);
    s.push('=');
    s.push_str(value);
    s.push(';');

    if !path.is_empty() {
        s.push_str("Path=");
        s.push_str(path);
        s.push(';');
    }
    if secure {
        s.push_str("Secure;");
    }
    if http_only {
        s.push_str("HttpOnly;");
    }
    if let Some(d) = max_age {
        s.push_str("Max-Age=");
        s.push_str(&d.as_secs().to_string());
        s.push(';');
    }
    s.push_str("SameSite=Strict");

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_beats_wildcard() {
        let picked = match_preferred_content_type(
            Some("text/html;q=0.5, application/json;q=0.9"),
            &["text/html", "application/json"],
        );
        assert_eq!(picked, Some("application/json"));
    }

    #[test]
    fn type_wildcard_is_honored() {
        let picked = match_preferred_content_type(Some("text/*;q=0.8"), &["text/plain"]);
        assert_eq!(picked, Some("text/plain"));
    }

    #[test]
    fn ties_favor_the_first_candidate() {
        let picked = match_preferred_content_type(Some("*/*"), &["application/json", "text/plain"]);
        assert_eq!(picked, Some("application/json"));
    }

    #[test]
    fn no_accept_header_accepts_first_candidate() {
        assert_eq!(match_preferred_content_type(None, &["application/json"]), Some("application/json"));
    }

    #[test]
    fn cookie_field_order() {
        let c = make_cookie("sid", "abc", "/admin", true, true, Some(std::time::Duration::from_secs(60)));
        assert_eq!(c, "__Secure-sid=abc;Path=/admin;Secure;HttpOnly;Max-Age=60;SameSite=Strict");
    }
}
