//! Metric-id matchers
//!
//! Three independent optional predicates ANDed together; an unset predicate
//! is a wildcard. Predicates are checked cheapest-first: prefix, substring,
//! regex.

use regex::bytes::Regex;

use crate::command::CommandError;

/// Compiled matcher for one route or blacklist entry.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    prefix: Option<Vec<u8>>,
    substring: Option<Vec<u8>>,
    regex: Option<Regex>,
}

impl Matcher {
    /// Compile a matcher from its optional predicate sources.
    pub fn new(
        prefix: Option<&str>,
        substring: Option<&str>,
        regex: Option<&str>,
    ) -> Result<Self, CommandError> {
        let regex = match regex {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| CommandError::BadRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            prefix: prefix.map(|p| p.as_bytes().to_vec()),
            substring: substring.map(|s| s.as_bytes().to_vec()),
            regex,
        })
    }

    /// Matcher that accepts every metric id.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Prefix-only matcher, as used by `addBlack`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.as_bytes().to_vec()),
            substring: None,
            regex: None,
        }
    }

    /// Whether a metric id satisfies every configured predicate.
    pub fn matches(&self, metric: &[u8]) -> bool {
        if let Some(prefix) = &self.prefix
            && !metric.starts_with(prefix)
        {
            return false;
        }
        if let Some(substring) = &self.substring
            && !contains(metric, substring)
        {
            return false;
        }
        if let Some(regex) = &self.regex
            && !regex.is_match(metric)
        {
            return false;
        }
        true
    }

    /// Whether no predicate is configured.
    pub fn is_match_all(&self) -> bool {
        self.prefix.is_none() && self.substring.is_none() && self.regex.is_none()
    }

    /// Stable one-line rendering for the admin view.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.prefix {
            parts.push(format!("prefix={}", String::from_utf8_lossy(p)));
        }
        if let Some(s) = &self.substring {
            parts.push(format!("sub={}", String::from_utf8_lossy(s)));
        }
        if let Some(r) = &self.regex {
            parts.push(format!("regex={}", r.as_str()));
        }
        if parts.is_empty() {
            "*".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matcher_matches_everything() {
        let m = Matcher::match_all();
        assert!(m.is_match_all());
        assert!(m.matches(b"anything.at.all"));
        assert!(m.matches(b""));
    }

    #[test]
    fn prefix_predicate() {
        let m = Matcher::new(Some("foo."), None, None).unwrap();
        assert!(m.matches(b"foo.bar"));
        assert!(!m.matches(b"barfoo.bar"));
    }

    #[test]
    fn substring_predicate() {
        let m = Matcher::new(None, Some("cpu"), None).unwrap();
        assert!(m.matches(b"host1.cpu.idle"));
        assert!(!m.matches(b"host1.mem.free"));
    }

    #[test]
    fn regex_predicate() {
        let m = Matcher::new(None, None, Some(r"^servers\.[^.]+\.load$")).unwrap();
        assert!(m.matches(b"servers.web1.load"));
        assert!(!m.matches(b"servers.web1.load.avg"));
    }

    #[test]
    fn predicates_are_anded() {
        let m = Matcher::new(Some("servers."), Some("web"), Some(r"load")).unwrap();
        assert!(m.matches(b"servers.web1.load"));
        assert!(!m.matches(b"servers.db1.load")); // substring fails
        assert!(!m.matches(b"clients.web1.load")); // prefix fails
        assert!(!m.matches(b"servers.web1.mem")); // regex fails
    }

    #[test]
    fn bad_regex_is_a_command_error() {
        let err = Matcher::new(None, None, Some("(unclosed")).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn describe_is_stable() {
        assert_eq!(Matcher::match_all().describe(), "*");
        let m = Matcher::new(Some("a."), Some("b"), None).unwrap();
        assert_eq!(m.describe(), "prefix=a. sub=b");
    }
}
