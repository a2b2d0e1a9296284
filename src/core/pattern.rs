//! Pattern matching for request paths
//!
//! Two disciplines are supported and deliberately kept apart:
//! - Glob: `*` matches any run of characters, including `/`. Everything else is literal
//!   and the whole path must match (e.g. `/api/files/*`).
//! - Prefix: the path must start with the pattern (e.g. `/api/analytics`).
//!
//! Request paths are normalized before either discipline is applied, see
//! [`PatternMatcher::normalize`].

use crate::error::{GateError, Result};
use regex::Regex;
use std::borrow::Cow;

/// Pattern matcher for request paths
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a path matches a glob pattern, anchored at both ends
    ///
    /// # Examples
    /// ```
    /// use gatehouse::core::pattern::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("/api/files/report.pdf", "/api/files/*"));
    /// assert!(PatternMatcher::matches("/api/files/a/b", "/api/files/*"));
    /// assert!(!PatternMatcher::matches("/api/files", "/api/files/*"));
    /// ```
    pub fn matches(path: &str, pattern: &str) -> bool {
        if !pattern.contains('*') {
            return path == pattern;
        }

        let parts: Vec<&str> = pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        // Anchors must fit without overlapping
        if path.len() < first.len() + last.len() {
            return false;
        }
        if !path.starts_with(first) || !path.ends_with(last) {
            return false;
        }

        // Middle literals must appear in order between the two anchors
        let mut window = &path[first.len()..path.len() - last.len()];
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match window.find(part) {
                Some(found) => window = &window[found + part.len()..],
                None => return false,
            }
        }

        true
    }

    /// Check if a path starts with the given prefix
    pub fn matches_prefix(path: &str, prefix: &str) -> bool {
        path.starts_with(prefix)
    }

    /// Normalize a request path before matching
    ///
    /// Percent-escapes of unreserved characters (`A-Z a-z 0-9 - . _ ~`) are decoded, since
    /// origins treat `%66iles` and `files` as the same segment. Other escapes are kept as
    /// sent, and a `%` that does not start an escape becomes `%25`. Then empty and `.`
    /// segments are dropped, `..` resolves against the previous segment (never above the
    /// root) and a trailing slash is kept.
    ///
    /// ```
    /// use gatehouse::core::pattern::PatternMatcher;
    ///
    /// assert_eq!(PatternMatcher::normalize("/api/%66iles/../%2e/x"), "/api/x");
    /// assert_eq!(PatternMatcher::normalize("/a%2Fb"), "/a%2Fb");
    /// ```
    pub fn normalize(path: &str) -> String {
        let mut resolved: Vec<Cow<'_, str>> = Vec::new();
        let mut dot_tail = false;

        for segment in path.split('/') {
            let segment = canonical_segment(segment);
            dot_tail = matches!(segment.as_ref(), "." | "..");
            if segment == ".." {
                resolved.pop();
            } else if !dot_tail && !segment.is_empty() {
                resolved.push(segment);
            }
        }

        if resolved.is_empty() {
            return "/".to_string();
        }

        let mut normalized = format!("/{}", resolved.join("/"));
        if path.ends_with('/') || dot_tail {
            normalized.push('/');
        }
        normalized
    }
}

/// Decode unreserved escapes in one segment and escape stray `%`
fn canonical_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains('%') {
        return Cow::Borrowed(segment);
    }

    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let escape = &rest[at..];
        match escaped_byte(escape) {
            Some(byte) if is_unreserved(byte) => {
                out.push(char::from(byte));
                rest = &escape[3..];
            }
            Some(_) => {
                out.push_str(&escape[..3]);
                rest = &escape[3..];
            }
            None => {
                out.push_str("%25");
                rest = &escape[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Byte encoded by a leading `%XY`, if well-formed
fn escaped_byte(escape: &str) -> Option<u8> {
    let digits = escape.get(1..3)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// A glob pattern compiled once at table construction
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile a glob pattern, escaping every literal run
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(GateError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern cannot be empty".to_string(),
            });
        }

        let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
        let source = format!("(?s)^{}$", body.join(".*"));
        let regex = Regex::new(&source).map_err(|e| GateError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CompiledPattern {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check a path against this pattern
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// True if the pattern is nothing but wildcards, or `/` followed by wildcards
    pub fn is_universal(&self) -> bool {
        let rest = self.source.strip_prefix('/').unwrap_or(&self.source);
        !rest.is_empty() && rest.chars().all(|c| c == '*')
    }

    /// The pattern as declared
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(PatternMatcher::matches("/api/status", "/api/status"));
        assert!(!PatternMatcher::matches("/api/status", "/api/statuses"));
        assert!(!PatternMatcher::matches("/api/Status", "/api/status"));
    }

    #[test]
    fn test_wildcard_crosses_segments() {
        assert!(PatternMatcher::matches("/api/files/report.pdf", "/api/files/*"));
        assert!(PatternMatcher::matches("/api/files/a/b/c", "/api/files/*"));
        assert!(PatternMatcher::matches("/anything/at/all", "/*"));
    }

    #[test]
    fn test_trailing_segment_boundary() {
        assert!(!PatternMatcher::matches("/api/files", "/api/files/*"));
        // Zero-width tail
        assert!(PatternMatcher::matches("/api/files/", "/api/files/*"));
        assert!(!PatternMatcher::matches("/api/filesystem", "/api/files/*"));
    }

    #[test]
    fn test_middle_wildcards() {
        assert!(PatternMatcher::matches("/users/alice/profile", "/users/*/profile"));
        assert!(PatternMatcher::matches("/users/a/b/profile", "/users/*/profile"));
        assert!(!PatternMatcher::matches("/users/alice/settings", "/users/*/profile"));
        assert!(PatternMatcher::matches("/logs/app-prod-2024.log", "/logs/*-*-*.log"));
        assert!(!PatternMatcher::matches("/logs/app.log", "/logs/*-*-*.log"));
    }

    #[test]
    fn test_anchors_do_not_overlap() {
        assert!(!PatternMatcher::matches("/ab", "/ab*b"));
        assert!(PatternMatcher::matches("/abb", "/ab*b"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(PatternMatcher::matches("/api/v1.0/x", "/api/v1.0/*"));
        assert!(!PatternMatcher::matches("/api/v1x0/x", "/api/v1.0/*"));

        let compiled = CompiledPattern::new("/api/v1.0/*").unwrap();
        assert!(compiled.is_match("/api/v1.0/x"));
        assert!(!compiled.is_match("/api/v1x0/x"));

        let compiled = CompiledPattern::new("/a+b/(c)/*").unwrap();
        assert!(compiled.is_match("/a+b/(c)/d"));
        assert!(!compiled.is_match("/aab/c/d"));
    }

    #[test]
    fn test_compiled_pattern_newline_in_path() {
        let compiled = CompiledPattern::new("/api/files/*").unwrap();
        assert!(compiled.is_match("/api/files/a\nb"));
        assert!(PatternMatcher::matches("/api/files/a\nb", "/api/files/*"));
    }

    #[test]
    fn test_compiled_pattern_universal() {
        assert!(CompiledPattern::new("*").unwrap().is_universal());
        assert!(CompiledPattern::new("/*").unwrap().is_universal());
        assert!(CompiledPattern::new("/**").unwrap().is_universal());
        assert!(!CompiledPattern::new("/").unwrap().is_universal());
        assert!(!CompiledPattern::new("/api/*").unwrap().is_universal());
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(CompiledPattern::new("").is_err());
    }

    #[test]
    fn test_prefix() {
        assert!(PatternMatcher::matches_prefix("/api/analytics/events", "/api/analytics"));
        assert!(PatternMatcher::matches_prefix("/api/analytics", "/api/analytics"));
        assert!(PatternMatcher::matches_prefix("/api/analyticsx", "/api/analytics"));
        assert!(!PatternMatcher::matches_prefix("/api/ads", "/api/analytics"));
    }

    #[test]
    fn test_normalize_basic() {
        assert_eq!(PatternMatcher::normalize(""), "/");
        assert_eq!(PatternMatcher::normalize("/"), "/");
        assert_eq!(PatternMatcher::normalize("/api/files/x"), "/api/files/x");
        assert_eq!(PatternMatcher::normalize("//api///files/x"), "/api/files/x");
        assert_eq!(PatternMatcher::normalize("/api/files/"), "/api/files/");
    }

    #[test]
    fn test_normalize_traversal() {
        assert_eq!(
            PatternMatcher::normalize("/api/files/../users/alice"),
            "/api/users/alice"
        );
        assert_eq!(PatternMatcher::normalize("/api/./files/./x"), "/api/files/x");
        assert_eq!(PatternMatcher::normalize("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(PatternMatcher::normalize("/api/files/.."), "/api/");
    }

    #[test]
    fn test_normalize_encoded_dots() {
        assert_eq!(
            PatternMatcher::normalize("/api/files/%2e%2e/users/alice"),
            "/api/users/alice"
        );
        assert_eq!(
            PatternMatcher::normalize("/api/files/%2E./users"),
            "/api/users"
        );
        assert_eq!(PatternMatcher::normalize("/api/%2e/files"), "/api/files");
        // Not a dot segment
        assert_eq!(PatternMatcher::normalize("/api/v1.0"), "/api/v1.0");
        assert_eq!(PatternMatcher::normalize("/api/files/%2e%2E"), "/api/");
    }

    #[test]
    fn test_normalize_unreserved_escapes() {
        assert_eq!(PatternMatcher::normalize("/api/%66iles/x"), "/api/files/x");
        assert_eq!(PatternMatcher::normalize("/%61%70%69/%41nalytics"), "/api/Analytics");
        assert_eq!(PatternMatcher::normalize("/a%2db%5Fc%7e"), "/a-b_c~");
    }

    #[test]
    fn test_normalize_reserved_escapes_kept() {
        assert_eq!(PatternMatcher::normalize("/api/a%2Fb"), "/api/a%2Fb");
        assert_eq!(PatternMatcher::normalize("/q%3Fx%20y"), "/q%3Fx%20y");
        assert_eq!(PatternMatcher::normalize("/100%25"), "/100%25");
    }

    #[test]
    fn test_normalize_stray_percent() {
        assert_eq!(PatternMatcher::normalize("/100%"), "/100%25");
        assert_eq!(PatternMatcher::normalize("/a%zz"), "/a%25zz");
        assert_eq!(PatternMatcher::normalize("/a%+1"), "/a%25+1");
        assert_eq!(PatternMatcher::normalize("/%%36%35"), "/%2565");
        assert_eq!(PatternMatcher::normalize("/%\u{e9}"), "/%25\u{e9}");
    }

    #[test]
    fn test_normalize_idempotent_on_escapes() {
        for path in ["/%%36%35", "/api/%2e%2e/%66%2Fx", "/a%", "/%2%36%35/..", "/x/%7E%25"] {
            let once = PatternMatcher::normalize(path);
            assert_eq!(PatternMatcher::normalize(&once), once, "path {}", path);
        }
    }
}
