//! Native-path placeholder expansion (spec §4.2, §8 property 4).
//!
//! Placeholders look like `%<home>` in a mount point's native path. `%` is
//! the escape character: `%%` is a literal `%`. Unknown or malformed
//! `%<...>` tokens are not left in place — they are rewritten to a sentinel
//! "invalid value" string so that [`super::validation`] can later report a
//! validation failure with an explanation, instead of silently producing a
//! path that happens to contain literal angle brackets.

/// Well-known placeholder key for the user's home directory.
pub const HOME_DIR: &str = "home";
/// Well-known placeholder key for the user's name.
pub const USER_NAME: &str = "user";

const INVALID_MARK: &str = "\0\0\0\0:";

/// Wraps `explanation` in the sentinel marker used to flag a placeholder
/// that failed to expand.
pub fn make_invalid_value(explanation: &str) -> String {
    let clean: String = explanation.chars().filter(|c| !c.is_control()).collect();
    format!("{INVALID_MARK}{clean}\0")
}

/// `true` if `s` contains one or more sentinel invalid-value markers.
pub fn is_invalid_value(s: &str) -> bool {
    s.contains(INVALID_MARK)
}

/// Collects every embedded explanation left by [`make_invalid_value`].
pub fn invalid_value_explanations(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(pos) = rest.find(INVALID_MARK) {
        let after = &rest[pos + INVALID_MARK.len()..];
        if let Some(end) = after.find('\0') {
            out.push(after[..end].to_string());
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    out
}

enum Entry {
    Plain { token: String, value: String },
    OnlyAtBeginning { token: String, value: String },
    AnythingBetween {
        left: char,
        right: char,
        value_escape: char,
        value_placeholder: String,
        template: String,
    },
}

/// A set of registered placeholders to expand a native path against.
#[derive(Default)]
pub struct PlaceholderMap {
    entries: Vec<Entry>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `%<token>` → `value`. An empty value is itself turned into
    /// an invalid-value sentinel, since a placeholder with nothing to
    /// substitute is as much a configuration error as an unknown one.
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        let token = token.into();
        if token.trim_matches(|c: char| c.is_control()).is_empty() {
            return;
        }
        let mut value = value.into();
        if value.is_empty() {
            value = make_invalid_value(&format!("The value of the placeholder %<{token}> is empty"));
        }
        self.entries.push(Entry::Plain {
            token: format!("<{token}>"),
            value,
        });
    }

    /// Registers a placeholder that only expands when it appears at the
    /// very start of the path (spec §4.2 "restricted to only at beginning").
    pub fn insert_only_at_beginning(&mut self, token: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry::OnlyAtBeginning {
            token: format!("<{}>", token.into()),
            value: value.into(),
        });
    }

    /// Registers the "anything between delimiters" capture placeholder:
    /// text found between `left` and `right` is captured and substituted
    /// into `template`'s occurrences of `%<value_placeholder>`.
    pub fn insert_anything_between(
        &mut self,
        left: char,
        right: char,
        value_escape: char,
        value_placeholder: impl Into<String>,
        template: impl Into<String>,
    ) {
        self.entries.push(Entry::AnythingBetween {
            left,
            right,
            value_escape,
            value_placeholder: value_placeholder.into(),
            template: template.into(),
        });
    }
}

/// Doubles every occurrence of `esc` in `s` (the inverse of
/// [`unescape`] when `s` contains no recognized placeholder tokens).
pub fn escape(s: &str, esc: char) -> String {
    let mut doubled = String::with_capacity(esc.len_utf8() * 2);
    doubled.push(esc);
    doubled.push(esc);
    s.replace(esc, &doubled)
}

/// Un-escapes `s` with no placeholder substitutions: `%%` → `%`.
pub fn unescape(s: &str, esc: char) -> String {
    substitute(s, esc, &PlaceholderMap::default())
}

/// Expands every `%<...>` placeholder in `path` using `map`, per the rules
/// above; this is the entry point mount-table merging calls.
pub fn substitute_placeholders(path: &str, map: &PlaceholderMap) -> String {
    substitute(path, '%', map)
}

fn substitute(input: &str, esc: char, map: &PlaceholderMap) -> String {
    let mut ret = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        match rest.find(esc) {
            None => {
                ret.push_str(rest);
                break;
            }
            Some(pos) => {
                ret.push_str(&rest[..pos]);
                rest = &rest[pos + esc.len_utf8()..];

                if try_match(&mut ret, &mut rest, map) {
                    continue;
                }

                if let Some(consumed) = try_unknown_token(&mut ret, rest) {
                    rest = &rest[consumed..];
                    continue;
                }

                // No placeholder matched: `%` is literal, and a doubled
                // escape character collapses to one.
                ret.push(esc);
                if rest.starts_with(esc) {
                    rest = &rest[esc.len_utf8()..];
                }
            }
        }
    }

    ret
}

fn try_match<'a>(ret: &mut String, rest: &mut &'a str, map: &PlaceholderMap) -> bool {
    for entry in &map.entries {
        match entry {
            Entry::AnythingBetween {
                left,
                right,
                value_escape,
                value_placeholder,
                template,
            } => {
                if rest.starts_with(*left) {
                    let after_left = &rest[left.len_utf8()..];
                    if let Some(rpos) = after_left.find(*right) {
                        let captured = &after_left[..rpos];
                        let mut sub_map = PlaceholderMap::new();
                        sub_map.insert(value_placeholder.clone(), captured.to_string());
                        let expanded = substitute(template, *value_escape, &sub_map);
                        ret.push_str(&expanded);
                        *rest = &after_left[rpos + right.len_utf8()..];
                        return true;
                    }
                }
            }
            Entry::OnlyAtBeginning { token, value } => {
                if ret.is_empty() && rest.starts_with(token.as_str()) {
                    ret.push_str(value);
                    *rest = &rest[token.len()..];
                    return true;
                }
            }
            Entry::Plain { token, value } => {
                if rest.starts_with(token.as_str()) {
                    ret.push_str(value);
                    *rest = &rest[token.len()..];
                    return true;
                }
            }
        }
    }
    false
}

/// If `rest` begins with `<key>` that none of the registered placeholders
/// matched, treats it as a misused/unknown placeholder and returns the
/// number of bytes consumed.
fn try_unknown_token(ret: &mut String, rest: &str) -> Option<usize> {
    if !rest.starts_with('<') {
        return None;
    }
    let end = rest.find('>')?;
    let key = &rest[1..end];
    ret.push_str(&make_invalid_value(&format!(
        "Unknown or misused placeholder %<{key}>"
    )));
    Some(end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_without_tokens() {
        for s in ["plain/path", "a%%b", "no percent at all", "%%%%"] {
            assert_eq!(unescape(&escape(s, '%'), '%'), s);
        }
    }

    #[test]
    fn empty_map_is_identity_without_percent_tokens() {
        let map = PlaceholderMap::new();
        assert_eq!(substitute_placeholders("/srv/ftp/docs", &map), "/srv/ftp/docs");
    }

    #[test]
    fn expands_known_placeholder() {
        let mut map = PlaceholderMap::new();
        map.insert(USER_NAME, "alice");
        assert_eq!(
            substitute_placeholders("/srv/%<user>/home", &map),
            "/srv/alice/home"
        );
    }

    #[test]
    fn doubled_percent_is_literal() {
        let map = PlaceholderMap::new();
        assert_eq!(substitute_placeholders("100%% done", &map), "100% done");
    }

    #[test]
    fn unknown_placeholder_becomes_invalid_value() {
        let map = PlaceholderMap::new();
        let out = substitute_placeholders("/srv/%<nope>/x", &map);
        assert!(is_invalid_value(&out));
        assert_eq!(
            invalid_value_explanations(&out),
            vec!["Unknown or misused placeholder %<nope>".to_string()]
        );
    }

    #[test]
    fn empty_value_becomes_invalid() {
        let mut map = PlaceholderMap::new();
        map.insert(HOME_DIR, "");
        let out = substitute_placeholders("%<home>/x", &map);
        assert!(is_invalid_value(&out));
    }

    #[test]
    fn only_at_beginning_does_not_match_mid_string() {
        let mut map = PlaceholderMap::new();
        map.insert_only_at_beginning("^h", "HOME");
        assert_eq!(substitute_placeholders("%<^h>/x", &map), "HOME/x");
        assert_eq!(substitute_placeholders("/x%<^h>", &map), "/x%<^h>");
    }

    #[test]
    fn anything_between_captures_and_substitutes() {
        let mut map = PlaceholderMap::new();
        map.insert_anything_between('{', '}', '%', "m", "matched:%<m>");
        assert_eq!(
            substitute_placeholders("prefix/%{abc}/suffix", &map),
            "prefix/matched:abc/suffix"
        );
    }
}
