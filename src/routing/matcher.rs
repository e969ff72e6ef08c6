//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive)
//! - Match path prefix (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use crate::http::RequestHeaderMap;

/// Trait for matching request headers against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the headers match this condition.
    fn matches(&self, headers: &RequestHeaderMap) -> bool;
}

/// Matches the request host (authority, falling back to the `host` header).
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, headers: &RequestHeaderMap) -> bool {
        headers
            .host()
            .map(|h| h.eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, headers: &RequestHeaderMap) -> bool {
        headers.path().starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, headers: &RequestHeaderMap) -> bool {
        self.matchers.iter().all(|m| m.matches(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        let req = RequestHeaderMap::new(Method::GET, "/").with_header("host", "example.com");
        assert!(matcher.matches(&req));

        let req = RequestHeaderMap::new(Method::GET, "/").with_authority("EXAMPLE.COM");
        assert!(matcher.matches(&req)); // Case insensitive

        let req = RequestHeaderMap::new(Method::GET, "/").with_header("host", "other.com");
        assert!(!matcher.matches(&req));

        let req = RequestHeaderMap::new(Method::GET, "/");
        assert!(!matcher.matches(&req));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");
        assert!(matcher.matches(&RequestHeaderMap::new(Method::GET, "/api/v1")));
        assert!(!matcher.matches(&RequestHeaderMap::new(Method::GET, "/images")));
        assert!(!matcher.matches(&RequestHeaderMap::new(Method::GET, "/API")));
    }

    #[test]
    fn test_empty_and_matcher_is_wildcard() {
        let matcher = AndMatcher::default();
        assert!(matcher.matches(&RequestHeaderMap::new(Method::GET, "/anything")));
    }

    #[test]
    fn test_and_matcher_requires_all() {
        let matcher = AndMatcher::new(vec![
            Box::new(HostMatcher::new("a.example")),
            Box::new(PathPrefixMatcher::new("/api")),
        ]);
        let req = RequestHeaderMap::new(Method::GET, "/api").with_authority("a.example");
        assert!(matcher.matches(&req));
        let req = RequestHeaderMap::new(Method::GET, "/web").with_authority("a.example");
        assert!(!matcher.matches(&req));
    }
}
