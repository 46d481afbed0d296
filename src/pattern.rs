//! Glob-style key patterns.
//!
//! Only `*` is special and matches any run of characters, including none.
//! Every other character is literal. Redis globs also give meaning to `?`,
//! `[`, `]` and `\`, so [`KeyPattern::to_glob`] escapes those before a
//! pattern reaches a key scan. Leading and trailing wildcards are the
//! supported forms; inner wildcards also work.

/// A parsed key pattern such as `app:weather:*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    /// Literal pieces between wildcards.
    parts: Vec<String>,
    leading_wildcard: bool,
    trailing_wildcard: bool,
}

impl KeyPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let parts = raw
            .split('*')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            leading_wildcard: raw.starts_with('*'),
            trailing_wildcard: raw.ends_with('*'),
            parts,
            raw,
        }
    }

    /// Pattern matching every key that starts with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(format!("{prefix}*"))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The pattern as a Redis glob: `*` stays a wildcard and the other glob
    /// metacharacters are backslash-escaped.
    pub fn to_glob(&self) -> String {
        let mut glob = String::with_capacity(self.raw.len());
        for c in self.raw.chars() {
            if matches!(c, '\\' | '?' | '[' | ']') {
                glob.push('\\');
            }
            glob.push(c);
        }
        glob
    }

    pub fn matches(&self, key: &str) -> bool {
        if !self.raw.contains('*') {
            return self.raw == key;
        }
        if self.parts.is_empty() {
            return true;
        }

        let mut rest = key;
        let last = self.parts.len() - 1;
        for (i, part) in self.parts.iter().enumerate() {
            if i == 0 && !self.leading_wildcard {
                match rest.strip_prefix(part.as_str()) {
                    Some(tail) => rest = tail,
                    None => return false,
                }
                continue;
            }
            if i == last && !self.trailing_wildcard {
                return rest.len() >= part.len() && rest.ends_with(part.as_str());
            }
            match rest.find(part.as_str()) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
        // every part consumed; anything left is covered by the trailing `*`
        self.trailing_wildcard || rest.is_empty()
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        let pattern = KeyPattern::new("app:a");
        assert!(pattern.matches("app:a"));
        assert!(!pattern.matches("app:ab"));
        assert!(!pattern.matches("xapp:a"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let pattern = KeyPattern::new("app:weather:*");
        assert!(pattern.matches("app:weather:berlin"));
        assert!(pattern.matches("app:weather:"));
        assert!(!pattern.matches("app:routes:berlin"));
        assert!(!pattern.matches("app:weather"));
    }

    #[test]
    fn test_leading_wildcard() {
        let pattern = KeyPattern::new("*:berlin");
        assert!(pattern.matches("app:weather:berlin"));
        assert!(!pattern.matches("app:weather:berlin2"));
    }

    #[test]
    fn test_both_wildcards_and_star_only() {
        assert!(KeyPattern::new("*weather*").matches("app:weather:x"));
        assert!(!KeyPattern::new("*weather*").matches("app:routes:x"));
        assert!(KeyPattern::new("*").matches(""));
        assert!(KeyPattern::new("*").matches("anything"));
    }

    #[test]
    fn test_inner_wildcard_does_not_overlap() {
        let pattern = KeyPattern::new("ab*ba");
        assert!(pattern.matches("abba"));
        assert!(pattern.matches("abxyzba"));
        assert!(!pattern.matches("aba"));
    }

    #[test]
    fn test_to_glob_escapes_metacharacters() {
        assert_eq!(KeyPattern::new("app:weather:*").to_glob(), "app:weather:*");
        assert_eq!(KeyPattern::new("app:a?:*").to_glob(), "app:a\\?:*");
        assert_eq!(
            KeyPattern::new("app:[eu]\\x:*").to_glob(),
            "app:\\[eu\\]\\\\x:*"
        );
    }

    #[test]
    fn test_metacharacters_match_literally() {
        let pattern = KeyPattern::new("app:a?:*");
        assert!(pattern.matches("app:a?:k"));
        assert!(!pattern.matches("app:ab:k"));
        assert!(KeyPattern::new("app:[x]").matches("app:[x]"));
        assert!(!KeyPattern::new("app:[x]").matches("app:x"));
    }

    proptest! {
        #[test]
        fn prop_prefix_pattern_matches_prefixed_keys(prefix in "[a-z:]{0,8}", tail in "[a-z0-9:]{0,12}") {
            let pattern = KeyPattern::prefix(&prefix);
            let key = format!("{prefix}{tail}");
            prop_assert!(pattern.matches(&key));
        }

        #[test]
        fn prop_prefix_pattern_agrees_with_starts_with(prefix in "[a-c]{1,4}", key in "[a-c]{0,6}") {
            let pattern = KeyPattern::prefix(&prefix);
            prop_assert_eq!(pattern.matches(&key), key.starts_with(&prefix));
        }

        #[test]
        fn prop_glob_without_metacharacters_is_unchanged(raw in "[a-z0-9:*]{0,16}") {
            prop_assert_eq!(KeyPattern::new(raw.clone()).to_glob(), raw);
        }

        #[test]
        fn prop_suffix_pattern_agrees_with_ends_with(suffix in "[a-c]{1,4}", key in "[a-c]{0,6}") {
            let pattern = KeyPattern::new(format!("*{suffix}"));
            prop_assert_eq!(pattern.matches(&key), key.ends_with(&suffix));
        }
    }
}
