//! API key discovery
//!
//! Order: explicit value, then `OPENROUTER_API_KEY`, then the first
//! meaningful line of a key file.

use std::path::Path;

/// Environment variable holding the key
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Key file looked up in the working directory
pub const DEFAULT_KEYFILE: &str = ".openrouter_key";

/// Read the first non-empty, non-comment line of `path`, unquoted
///
/// Returns `None` when the file is missing or holds no key.
#[must_use]
pub fn load_api_key_from_keyfile(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_matches(|c| c == '"' || c == '\'').trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Pick the first available key
#[must_use]
pub fn resolve_api_key(
    explicit: Option<&str>,
    env_value: Option<String>,
    keyfile: &Path,
) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    explicit
        .and_then(non_empty)
        .or_else(|| env_value.as_deref().and_then(non_empty))
        .or_else(|| load_api_key_from_keyfile(keyfile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyfile_skips_comments_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_KEYFILE);
        std::fs::write(&path, "# OpenRouter\n\n  \"sk-or-123\"  \nsk-other\n").unwrap();
        assert_eq!(load_api_key_from_keyfile(&path).as_deref(), Some("sk-or-123"));
    }

    #[test]
    fn keyfile_missing_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_api_key_from_keyfile(&dir.path().join("absent")), None);
        let path = dir.path().join("empty");
        std::fs::write(&path, "# nothing here\n''\n").unwrap();
        assert_eq!(load_api_key_from_keyfile(&path), None);
    }

    #[test]
    fn precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_KEYFILE);
        std::fs::write(&path, "from-file\n").unwrap();

        assert_eq!(
            resolve_api_key(Some("flag"), Some("env".into()), &path).as_deref(),
            Some("flag")
        );
        assert_eq!(
            resolve_api_key(Some("  "), Some("env".into()), &path).as_deref(),
            Some("env")
        );
        assert_eq!(resolve_api_key(None, None, &path).as_deref(), Some("from-file"));
        assert_eq!(resolve_api_key(None, None, &dir.path().join("x")), None);
    }
}
