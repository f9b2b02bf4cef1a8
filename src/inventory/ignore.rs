//! Ignore predicate: classifies object keys that never enter an inventory
//! (thumbnail sidecars, OS cache files).
//!
//! Patterns use shell-style globs. A pattern without `/` is matched against
//! the key's final component; a pattern containing `/` is matched against the
//! whole key. Matching is case-insensitive because keys are compared
//! case-insensitively downstream.

#![allow(missing_docs)]

use regex::Regex;

use crate::core::errors::{NbrError, Result};

/// Patterns applied when the configuration does not override them.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &["*.thump.png", "*.thumb.png", "Thumbs.db", ".DS_Store"];

/// Pure per-key exclusion test, evaluated once per leaf before its attribute lookup.
pub trait IgnorePredicate: Send + Sync {
    fn is_ignored(&self, key: &str) -> bool;
}

impl<F> IgnorePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ignored(&self, key: &str) -> bool {
        self(key)
    }
}

#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
    whole_key: bool,
}

/// Compiled set of ignore globs.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<GlobPattern>,
}

impl IgnoreRules {
    /// Compile `patterns`. Any invalid glob fails the whole set.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pat| {
                let pat = pat.as_ref();
                Ok(GlobPattern {
                    original: pat.to_string(),
                    compiled: glob_to_regex(pat)?,
                    whole_key: pat.contains('/'),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Rules built from [`DEFAULT_IGNORE_PATTERNS`].
    pub fn defaults() -> Self {
        Self::new(DEFAULT_IGNORE_PATTERNS).unwrap_or_default()
    }

    /// Rules that ignore nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.original.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl IgnorePredicate for IgnoreRules {
    fn is_ignored(&self, key: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let key = key.replace('\\', "/");
        let base = key.rsplit('/').next().unwrap_or(&key);
        self.patterns.iter().any(|pat| {
            if pat.whole_key {
                pat.compiled.is_match(&key)
            } else {
                pat.compiled.is_match(base)
            }
        })
    }
}

/// Validate that a glob pattern can be compiled.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    glob_to_regex(pattern).map(|_| ())
}

/// Convert a shell-style glob to an anchored, case-insensitive regex.
///
/// - `**` → any run of characters including `/`
/// - `*`  → any run of characters except `/`
/// - `?`  → one character except `/`
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(NbrError::InvalidConfig {
            details: "ignore pattern must not be empty".to_string(),
        });
    }

    let normalized = pattern.replace('\\', "/");
    let mut regex_str = String::with_capacity(normalized.len() * 2 + 6);
    regex_str.push_str("(?i)^");

    let chars: Vec<char> = normalized.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| NbrError::InvalidConfig {
        details: format!("invalid ignore pattern {pattern:?}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ignore_thumbnail_sidecars_anywhere() {
        let rules = IgnoreRules::defaults();
        assert!(rules.is_ignored("photos/2020/IMG_0001.thump.png"));
        assert!(rules.is_ignored("IMG_0001.thump.png"));
        assert!(rules.is_ignored("a/b/Thumbs.db"));
        assert!(rules.is_ignored("a/.DS_Store"));
        assert!(!rules.is_ignored("photos/2020/IMG_0001.png"));
        assert!(!rules.is_ignored("thump.png/real.jpg"));
    }

    #[test]
    fn basename_patterns_are_case_insensitive() {
        let rules = IgnoreRules::new(&["*.tmp"]).unwrap();
        assert!(rules.is_ignored("x/Y/report.TMP"));
        assert!(!rules.is_ignored("x/tmp/report.txt"));
    }

    #[test]
    fn slash_patterns_match_the_whole_key() {
        let rules = IgnoreRules::new(&["cache/**", "**/.git/**"]).unwrap();
        assert!(rules.is_ignored("cache/a/b.bin"));
        assert!(!rules.is_ignored("data/cache/a.bin"));
        assert!(rules.is_ignored("src/.git/HEAD"));
        assert!(rules.is_ignored(".git/config"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let rules = IgnoreRules::new(&["~$?.doc"]).unwrap();
        assert!(rules.is_ignored("office/~$a.doc"));
        assert!(!rules.is_ignored("office/~$ab.doc"));
    }

    #[test]
    fn backslash_keys_are_treated_as_separators() {
        let rules = IgnoreRules::new(&["Thumbs.db"]).unwrap();
        assert!(rules.is_ignored("dir\\sub\\Thumbs.db"));
    }

    #[test]
    fn empty_rules_ignore_nothing() {
        let rules = IgnoreRules::none();
        assert!(rules.is_empty());
        assert!(!rules.is_ignored("anything.thump.png"));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let err = IgnoreRules::new(&["  "]).unwrap_err();
        assert_eq!(err.code(), "NBR-1001");
        assert!(validate_glob_pattern("").is_err());
        assert!(validate_glob_pattern("*.png").is_ok());
    }

    #[test]
    fn closures_are_predicates() {
        let pred = |key: &str| key.ends_with(".part");
        assert!(pred.is_ignored("upload.part"));
        assert!(!IgnorePredicate::is_ignored(&pred, "upload.bin"));
    }
}
