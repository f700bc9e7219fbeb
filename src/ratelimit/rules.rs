//! Route rate limit rules and resolution.
//!
//! A path resolves to exactly one rule: an exact-match entry if one exists,
//! otherwise the wildcard default. No prefix or glob matching is attempted;
//! any path without an exact entry gets the default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Pattern naming the default rule in rule files.
pub const WILDCARD_PATTERN: &str = "/api/*";
/// The chat completion route.
pub const CHAT_PATH: &str = "/api/chat";

const DEFAULT_REQUESTS: u32 = 100;
const DEFAULT_WINDOW_SECS: u64 = 60;
const CHAT_REQUESTS: u32 = 10;
const CHAT_WINDOW_SECS: u64 = 60;

/// A fixed-window rule: at most `requests` per `window` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window
    pub requests: u32,
    /// Window length in seconds
    pub window: u64,
}

impl RateLimitRule {
    /// Create a rule.
    pub const fn new(requests: u32, window: u64) -> Self {
        Self { requests, window }
    }

    /// Window length in milliseconds.
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    fn validate(&self, pattern: &str) -> Result<()> {
        if self.requests == 0 {
            return Err(TollgateError::Config(format!(
                "rule for {} must allow at least one request",
                pattern
            )));
        }
        if self.window == 0 {
            return Err(TollgateError::Config(format!(
                "rule for {} must have a window of at least one second",
                pattern
            )));
        }
        Ok(())
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

/// A rule bound to a path in a rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    /// Exact request path, or [`WILDCARD_PATTERN`] for the default
    pub path: String,
    /// The rule itself
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// On-disk layout of a rule file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default)]
    default: Option<RateLimitRule>,
    #[serde(default)]
    rules: Vec<PathRule>,
}

/// Immutable table of exact-path rules with one default.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    exact: HashMap<String, RateLimitRule>,
    default: RateLimitRule,
}

impl RuleTable {
    /// A table with no exact rules.
    pub fn new(default: RateLimitRule) -> Self {
        Self {
            exact: HashMap::new(),
            default,
        }
    }

    /// Add an exact-path rule, replacing any previous rule for that path.
    pub fn with_rule(mut self, path: impl Into<String>, rule: RateLimitRule) -> Self {
        self.exact.insert(path.into(), rule);
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    ///
    /// A rule for [`WILDCARD_PATTERN`] sets the default, as does a top-level
    /// `default:` section. Without either the built-in default applies.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse rate limit rules: {}", e)))?;

        let mut default = file.default;
        let mut exact = HashMap::with_capacity(file.rules.len());

        for PathRule { path, rule } in file.rules {
            rule.validate(&path)?;
            if path == WILDCARD_PATTERN {
                if default.replace(rule).is_some() {
                    return Err(TollgateError::Config(format!(
                        "default rule given more than once (via `default` and {})",
                        WILDCARD_PATTERN
                    )));
                }
            } else if exact.insert(path.clone(), rule).is_some() {
                return Err(TollgateError::Config(format!(
                    "duplicate rule for path {}",
                    path
                )));
            }
        }

        let default = default.unwrap_or_default();
        default.validate(WILDCARD_PATTERN)?;

        info!(
            exact_rules = exact.len(),
            default_requests = default.requests,
            default_window = default.window,
            "Rate limit rules loaded"
        );
        Ok(Self { exact, default })
    }

    /// The rule governing `path`.
    pub fn resolve(&self, path: &str) -> &RateLimitRule {
        self.exact.get(path).unwrap_or(&self.default)
    }

    /// The wildcard default rule.
    pub fn default_rule(&self) -> &RateLimitRule {
        &self.default
    }

    /// Number of exact-path rules.
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// Whether there are no exact-path rules.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

impl Default for RuleTable {
    /// `/api/chat` at 10 per minute, everything else at 100 per minute.
    fn default() -> Self {
        Self::new(RateLimitRule::default())
            .with_rule(CHAT_PATH, RateLimitRule::new(CHAT_REQUESTS, CHAT_WINDOW_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = RuleTable::default();
        assert_eq!(table.len(), 1);
        assert_eq!(*table.resolve("/api/chat"), RateLimitRule::new(10, 60));
        assert_eq!(*table.resolve("/api/users"), RateLimitRule::new(100, 60));
    }

    #[test]
    fn test_exact_match_only() {
        let table = RuleTable::default();

        // No prefix matching: sub-paths and other families fall to the default.
        assert_eq!(table.resolve("/api/chat/stream").requests, 100);
        assert_eq!(table.resolve("/api/chat/").requests, 100);
        assert_eq!(table.resolve("/admin/settings").requests, 100);
        assert_eq!(table.resolve("").requests, 100);
    }

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
default:
  requests: 200
  window: 30
rules:
  - path: /api/chat
    requests: 5
    window: 60
  - path: /api/search
    requests: 20
    window: 10
"#;
        let table = RuleTable::from_yaml(yaml).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(*table.resolve("/api/chat"), RateLimitRule::new(5, 60));
        assert_eq!(*table.resolve("/api/search"), RateLimitRule::new(20, 10));
        assert_eq!(*table.resolve("/api/other"), RateLimitRule::new(200, 30));
    }

    #[test]
    fn test_wildcard_rule_sets_default() {
        let yaml = r#"
rules:
  - path: /api/*
    requests: 42
    window: 15
"#;
        let table = RuleTable::from_yaml(yaml).unwrap();
        assert!(table.is_empty());
        assert_eq!(*table.default_rule(), RateLimitRule::new(42, 15));
    }

    #[test]
    fn test_missing_default_uses_builtin() {
        let yaml = r#"
rules:
  - path: /api/chat
    requests: 10
    window: 60
"#;
        let table = RuleTable::from_yaml(yaml).unwrap();
        assert_eq!(*table.default_rule(), RateLimitRule::new(100, 60));
    }

    #[test]
    fn test_rejects_zero_values() {
        let zero_requests = r#"
rules:
  - path: /api/chat
    requests: 0
    window: 60
"#;
        assert!(matches!(
            RuleTable::from_yaml(zero_requests),
            Err(TollgateError::Config(_))
        ));

        let zero_window = r#"
default:
  requests: 10
  window: 0
"#;
        assert!(matches!(
            RuleTable::from_yaml(zero_window),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicates() {
        let yaml = r#"
rules:
  - path: /api/chat
    requests: 1
    window: 60
  - path: /api/chat
    requests: 2
    window: 60
"#;
        assert!(RuleTable::from_yaml(yaml).is_err());

        let yaml = r#"
default:
  requests: 1
  window: 60
rules:
  - path: /api/*
    requests: 2
    window: 60
"#;
        assert!(RuleTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(matches!(
            RuleTable::from_yaml("rules: [path: {"),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(
            &path,
            "rules:\n  - path: /api/chat\n    requests: 3\n    window: 60\n",
        )
        .unwrap();

        let table = RuleTable::from_file(&path).unwrap();
        assert_eq!(table.resolve("/api/chat").requests, 3);

        assert!(matches!(
            RuleTable::from_file(dir.path().join("missing.yaml")),
            Err(TollgateError::Io(_))
        ));
    }

    #[test]
    fn test_window_millis() {
        assert_eq!(RateLimitRule::new(1, 60).window_millis(), 60_000);
        assert_eq!(RateLimitRule::new(1, u64::MAX).window_millis(), i64::MAX);
    }
}
