//! Environment loading helpers.
//!
//! Alias fallback chains live here so callers never repeat `or_else` ladders around
//! `std::env::var`.

use std::env;
use std::path::Path;

/// Load `.env` from the current directory into the process environment.
///
/// Runs once per process and never overrides variables that are already set.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let dir = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let applied = load_dotenv_from_dir(&dir);
        if applied > 0 {
            tracing::debug!(applied, "Loaded .env from {}", dir.display());
        }
    });
}

/// Load `<dir>/.env` into the process environment (existing variables win).
///
/// Returns the number of variables that were applied. A missing file is not an error.
pub fn load_dotenv_from_dir(dir: &Path) -> usize {
    let path = dir.join(".env");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return 0;
    };
    let mut applied = 0;
    for (key, value) in parse_dotenv(&content) {
        if env::var(&key).is_err() {
            set_env_var(&key, &value);
            applied += 1;
        }
    }
    applied
}

/// Parse `.env` text into key/value pairs.
///
/// Handles blank lines, `#` comments, inline comments outside quotes, and single or
/// double quoted values.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();
        if let Some(hash_pos) = value.find('#') {
            let before_hash = value[..hash_pos].trim_end();
            if !before_hash.contains('"') && !before_hash.contains('\'') {
                value = before_hash;
            }
        }
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Read the primary key or the first set alias; fall back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Read the primary key or an alias. Empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Boolean variable: `0/false/no/off` are false, anything else set is true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Unsigned integer variable. Unparsable values are logged and replaced by `default`.
pub fn env_usize(primary: &str, aliases: &[&str], default: usize) -> usize {
    match env_optional(primary, aliases) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = primary, value = %raw, "Invalid integer, using default {}", default);
            default
        }),
        None => default,
    }
}

/// Floating point variable. Unparsable values are logged and replaced by `default`.
pub fn env_f64(primary: &str, aliases: &[&str], default: f64) -> f64 {
    match env_optional(primary, aliases) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = primary, value = %raw, "Invalid number, using default {}", default);
            default
        }),
        None => default,
    }
}

/// Whether the primary key or any alias is set.
pub fn env_is_set(primary: &str, aliases: &[&str]) -> bool {
    env::var(primary).is_ok() || aliases.iter().any(|a| env::var(a).is_ok())
}

// ─── Centralised env::set_var / remove_var ──────────────────────────────────
//
// Callers must invoke these before any multi-threaded runtime starts.

/// Set a single environment variable.
#[allow(unsafe_code)]
pub fn set_env_var(key: &str, value: &str) {
    unsafe { env::set_var(key, value) };
}

/// Remove a single environment variable.
#[allow(unsafe_code)]
pub fn remove_env_var(key: &str) {
    unsafe { env::remove_var(key) };
}

/// RAII guard that removes the named variable on drop.
pub struct ScopedEnvGuard(pub &'static str);

impl Drop for ScopedEnvGuard {
    fn drop(&mut self) {
        remove_env_var(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_handles_quotes_and_comments() {
        let content = r#"
# comment
A=1
B = "two words"
C='single'
D=value # trailing comment
E="keep # inside quotes"
not a pair
"#;
        let pairs = parse_dotenv(content);
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("A").as_deref(), Some("1"));
        assert_eq!(get("B").as_deref(), Some("two words"));
        assert_eq!(get("C").as_deref(), Some("single"));
        assert_eq!(get("D").as_deref(), Some("value"));
        assert_eq!(get("E").as_deref(), Some("keep # inside quotes"));
        assert_eq!(pairs.len(), 5);
    }

    #[test]
    fn test_load_dotenv_from_dir_does_not_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "DISPATCHLITE_TEST_DOTENV_NEW=fresh\nDISPATCHLITE_TEST_DOTENV_SET=from_file\n",
        )
        .unwrap();
        set_env_var("DISPATCHLITE_TEST_DOTENV_SET", "from_env");
        let _g1 = ScopedEnvGuard("DISPATCHLITE_TEST_DOTENV_NEW");
        let _g2 = ScopedEnvGuard("DISPATCHLITE_TEST_DOTENV_SET");

        let applied = load_dotenv_from_dir(dir.path());
        assert_eq!(applied, 1);
        assert_eq!(env::var("DISPATCHLITE_TEST_DOTENV_NEW").unwrap(), "fresh");
        assert_eq!(env::var("DISPATCHLITE_TEST_DOTENV_SET").unwrap(), "from_env");
    }

    #[test]
    fn test_load_dotenv_from_dir_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_dotenv_from_dir(dir.path()), 0);
    }

    #[test]
    fn test_env_or_alias_chain() {
        set_env_var("DISPATCHLITE_TEST_ALIAS_B", "from-alias");
        let _g = ScopedEnvGuard("DISPATCHLITE_TEST_ALIAS_B");
        let v = env_or(
            "DISPATCHLITE_TEST_ALIAS_A",
            &["DISPATCHLITE_TEST_ALIAS_B"],
            || "default".to_string(),
        );
        assert_eq!(v, "from-alias");
        let d = env_or("DISPATCHLITE_TEST_ALIAS_MISSING", &[], || "default".to_string());
        assert_eq!(d, "default");
    }

    #[test]
    fn test_env_bool_and_numbers() {
        set_env_var("DISPATCHLITE_TEST_BOOL", "off");
        set_env_var("DISPATCHLITE_TEST_USIZE", "12");
        set_env_var("DISPATCHLITE_TEST_F64", "not-a-number");
        let _g1 = ScopedEnvGuard("DISPATCHLITE_TEST_BOOL");
        let _g2 = ScopedEnvGuard("DISPATCHLITE_TEST_USIZE");
        let _g3 = ScopedEnvGuard("DISPATCHLITE_TEST_F64");

        assert!(!env_bool("DISPATCHLITE_TEST_BOOL", &[], true));
        assert!(env_bool("DISPATCHLITE_TEST_BOOL_UNSET", &[], true));
        assert_eq!(env_usize("DISPATCHLITE_TEST_USIZE", &[], 3), 12);
        assert_eq!(env_f64("DISPATCHLITE_TEST_F64", &[], 0.5), 0.5);
        assert!(env_is_set("DISPATCHLITE_TEST_USIZE", &[]));
    }
}
