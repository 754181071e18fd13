//! Wildcard URL matching for userscript `@match` rules.
//!
//! A rule has the form `[scheme://]domain[/path]`, where `*` in the domain or
//! path matches any sequence of characters:
//!
//! - `https://*/*` matches every HTTPS page
//! - `http://*.example.com/*` matches any subdomain of `example.com` over HTTP
//! - `http*://example.com` matches the root page over either scheme
//! - `*://example.com/*.gif` matches any `.gif` on `example.com`
//!
//! Only `http://` and `https://` restrict the scheme. Any other scheme prefix
//! (`http*://`, `*://`) is stripped and matches both.
//!
//! # Example
//!
//! ```
//! use mitm_addon::inject::UrlMatcher;
//!
//! let rule = UrlMatcher::new("http://*.example.com/*");
//! assert!(rule.matches("http", "www.example.com", "/index.html"));
//! assert!(!rule.matches("https", "www.example.com", "/index.html"));
//! ```

use regex::Regex;
use std::fmt;

/// Scheme restriction parsed from the rule prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeRestriction {
    /// No restriction (no prefix, or a wildcard prefix such as `http*://`).
    Any,
    /// Rule started with `http://`.
    HttpOnly,
    /// Rule started with `https://`.
    HttpsOnly,
}

impl SchemeRestriction {
    fn permits(self, scheme: &str) -> bool {
        match self {
            SchemeRestriction::Any => true,
            SchemeRestriction::HttpOnly => scheme.eq_ignore_ascii_case("http"),
            SchemeRestriction::HttpsOnly => scheme.eq_ignore_ascii_case("https"),
        }
    }
}

/// A compiled `@match` rule.
///
/// Immutable once built. A rule without a domain pattern is invalid and never
/// matches anything.
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    /// The rule as written in the script header.
    pattern: String,
    /// Scheme restriction from the rule prefix.
    scheme: SchemeRestriction,
    /// Anchored domain expression.
    domain: Option<Regex>,
    /// Anchored path expression, matched against the path without its leading `/`.
    path: Option<Regex>,
}

impl UrlMatcher {
    /// Compile a rule.
    ///
    /// Compilation never fails: a rule that cannot produce a domain pattern
    /// yields an invalid matcher (see [`UrlMatcher::is_valid`]).
    pub fn new(pattern: &str) -> Self {
        let scheme = if pattern.starts_with("http://") {
            SchemeRestriction::HttpOnly
        } else if pattern.starts_with("https://") {
            SchemeRestriction::HttpsOnly
        } else {
            SchemeRestriction::Any
        };

        let mut rest = pattern;
        if let Some(idx) = pattern.find("://")
            && idx > 0
        {
            rest = &pattern[idx + 3..];
        }

        let (domain, path) = match rest.find('/') {
            Some(idx) if idx > 0 => (&rest[..idx], Some(&rest[idx + 1..])),
            _ => (rest, None),
        };

        let domain = if domain.is_empty() {
            None
        } else {
            wildcard_to_regex(domain)
        };

        Self {
            pattern: pattern.to_string(),
            scheme,
            domain,
            path: path.and_then(wildcard_to_regex),
        }
    }

    /// The original rule text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The scheme restriction of this rule.
    pub fn scheme_restriction(&self) -> SchemeRestriction {
        self.scheme
    }

    /// Whether the rule has a domain pattern.
    pub fn is_valid(&self) -> bool {
        self.domain.is_some()
    }

    /// Check a request against this rule.
    ///
    /// `path` may be given with or without its leading `/`. An empty path only
    /// matches rules that have no path part, or whose path part accepts the
    /// empty string (such as `/*`).
    pub fn matches(&self, scheme: &str, host: &str, path: &str) -> bool {
        let Some(ref domain) = self.domain else {
            return false;
        };

        if !self.scheme.permits(scheme) {
            return false;
        }

        if !domain.is_match(host) {
            return false;
        }

        let path = path.strip_prefix('/').unwrap_or(path);
        match self.path {
            Some(ref expr) => expr.is_match(path),
            None => path.is_empty(),
        }
    }
}

impl fmt::Display for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Escape a rule fragment and turn `*` into an unanchored wildcard, anchored at
/// both ends.
fn wildcard_to_regex(fragment: &str) -> Option<Regex> {
    let expr = regex::escape(fragment).replace(r"\*", ".*");
    Regex::new(&format!("^(?:{})$", expr)).ok()
}
