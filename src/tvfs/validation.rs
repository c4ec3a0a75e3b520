//! Virtual and native path validation (spec §4.2).

use super::placeholders::{invalid_value_explanations, is_invalid_value};

/// Target filesystem flavor a native path is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFormat {
    Posix,
    Windows,
}

impl NativeFormat {
    /// The format of whatever OS this binary is actually running on.
    pub fn host() -> Self {
        if cfg!(windows) {
            NativeFormat::Windows
        } else {
            NativeFormat::Posix
        }
    }
}

/// Why a path failed validation; carries enough detail for the resolver to
/// report a consistent, explainable error rather than a bare boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    PathIsEmpty,
    PathIsNotAbsolute,
    PathHasInvalidCharacters,
    InvalidPlaceholderValues { explanations: Vec<String> },
}

pub type ValidationResult = Result<(), ValidationFailure>;

/// Validates a client-visible virtual path: non-empty, absolute unix-style,
/// and — when the host is Windows — free of `\`, `:`, and elements with
/// trailing space/dot (characters Windows silently strips, which would let
/// two distinct virtual paths alias the same node).
pub fn validate_tvfs_path(path: &str, host: NativeFormat) -> ValidationResult {
    if path.is_empty() {
        return Err(ValidationFailure::PathIsEmpty);
    }
    if !path.starts_with('/') {
        return Err(ValidationFailure::PathIsNotAbsolute);
    }
    if host == NativeFormat::Windows {
        for element in path.split('/').filter(|e| !e.is_empty()) {
            if element.contains('\\') || element.contains(':') {
                return Err(ValidationFailure::PathHasInvalidCharacters);
            }
            if element.ends_with(' ') || element.ends_with('.') {
                return Err(ValidationFailure::PathHasInvalidCharacters);
            }
        }
    }
    Ok(())
}

/// Validates a (placeholder-expanded) native path.
pub fn validate_native_path(path: &str, format: NativeFormat) -> ValidationResult {
    if is_invalid_value(path) {
        return Err(ValidationFailure::InvalidPlaceholderValues {
            explanations: invalid_value_explanations(path),
        });
    }
    if path.is_empty() {
        return Err(ValidationFailure::PathIsEmpty);
    }
    if !is_absolute(path, format) {
        return Err(ValidationFailure::PathIsNotAbsolute);
    }
    if has_invalid_chars(path, format) {
        return Err(ValidationFailure::PathHasInvalidCharacters);
    }
    Ok(())
}

fn is_absolute(path: &str, format: NativeFormat) -> bool {
    match format {
        NativeFormat::Posix => path.starts_with('/'),
        NativeFormat::Windows => {
            let bytes = path.as_bytes();
            let drive_absolute = bytes.len() >= 3
                && bytes[0].is_ascii_alphabetic()
                && bytes[1] == b':'
                && (bytes[2] == b'\\' || bytes[2] == b'/');
            let unc = path.starts_with("\\\\") || path.starts_with("//");
            drive_absolute || unc
        }
    }
}

fn has_invalid_chars(path: &str, format: NativeFormat) -> bool {
    match format {
        NativeFormat::Posix => path.contains('\0'),
        NativeFormat::Windows => path.chars().any(|c| matches!(c, '<' | '>' | '"' | '|' | '?' | '*' | '\0')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_relative_virtual_paths() {
        assert_eq!(
            validate_tvfs_path("", NativeFormat::Posix),
            Err(ValidationFailure::PathIsEmpty)
        );
        assert_eq!(
            validate_tvfs_path("docs/file", NativeFormat::Posix),
            Err(ValidationFailure::PathIsNotAbsolute)
        );
    }

    #[test]
    fn accepts_absolute_virtual_path() {
        assert_eq!(validate_tvfs_path("/docs/file.txt", NativeFormat::Posix), Ok(()));
    }

    #[test]
    fn windows_host_rejects_backslash_and_trailing_dot() {
        assert!(validate_tvfs_path("/docs/a\\b", NativeFormat::Windows).is_err());
        assert!(validate_tvfs_path("/docs/trailing.", NativeFormat::Windows).is_err());
        assert!(validate_tvfs_path("/docs/ok", NativeFormat::Windows).is_ok());
    }

    #[test]
    fn native_path_surfaces_placeholder_failure_with_explanation() {
        let bad = crate::tvfs::placeholders::make_invalid_value("boom");
        let err = validate_native_path(&bad, NativeFormat::Posix).unwrap_err();
        assert_eq!(
            err,
            ValidationFailure::InvalidPlaceholderValues {
                explanations: vec!["boom".to_string()]
            }
        );
    }

    #[test]
    fn native_path_must_be_absolute() {
        assert_eq!(
            validate_native_path("relative/path", NativeFormat::Posix),
            Err(ValidationFailure::PathIsNotAbsolute)
        );
        assert_eq!(validate_native_path("/srv/ftp", NativeFormat::Posix), Ok(()));
    }
}
