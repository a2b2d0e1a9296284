//! Ordered rule tables mapping resources to required permissions
//!
//! Tables are evaluated first-match-wins in declaration order. Every table ends with
//! a catch-all fallback entry; this is checked when the table is built, so resolution
//! can never fall off the end.

use super::pattern::{CompiledPattern, PatternMatcher};
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consent categories used by the built-in consent table
pub mod consent {
    /// Required for the site to function; always granted
    pub const ESSENTIAL: &str = "essential";
    /// Enhances experience
    pub const FUNCTIONAL: &str = "functional";
    /// Usage tracking
    pub const ANALYTICS: &str = "analytics";
    /// Ads, targeting
    pub const MARKETING: &str = "marketing";
    /// Customization
    pub const PERSONALIZATION: &str = "personalization";
}

/// Capabilities used by the built-in capability table
pub mod capability {
    pub const FILE_READ: &str = "file.read";
    pub const FILE_WRITE: &str = "file.write";
    pub const FILE_DELETE: &str = "file.delete";
    pub const USER_READ: &str = "user.read";
    pub const USER_WRITE: &str = "user.write";
    pub const ANALYTICS_WRITE: &str = "analytics.write";
    /// Granted implicitly to unauthenticated `GET` requests
    pub const PUBLIC_READ: &str = "public.read";
}

/// How a table's patterns are matched against the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchDiscipline {
    /// Path starts with the pattern; request method ignored
    Prefix,
    /// Whole path matches the glob, and the method is in the entry's method set
    Glob,
}

impl fmt::Display for MatchDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchDiscipline::Prefix => write!(f, "prefix"),
            MatchDiscipline::Glob => write!(f, "glob"),
        }
    }
}

/// A declared rule: pattern, optional method set, required permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Path pattern (prefix or glob, depending on the table)
    pub pattern: String,

    /// Methods this rule applies to; `None` means any method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,

    /// Permissions the caller must hold, in declaration order
    pub requires: Vec<String>,
}

impl RuleEntry {
    /// Rule that applies to any method
    pub fn new<P, I, S>(pattern: P, requires: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RuleEntry {
            pattern: pattern.into(),
            methods: None,
            requires: requires.into_iter().map(Into::into).collect(),
        }
    }

    /// Restrict this rule to the given methods
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Prefix(String),
    Glob(CompiledPattern),
}

impl Matcher {
    fn is_universal(&self) -> bool {
        match self {
            Matcher::Prefix(prefix) => prefix.is_empty() || prefix == "/",
            Matcher::Glob(glob) => glob.is_universal(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    entry: RuleEntry,
    matcher: Matcher,
}

impl CompiledRule {
    fn applies_to(&self, method: &str, path: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(prefix) => PatternMatcher::matches_prefix(path, prefix),
            Matcher::Glob(glob) => {
                let method_matches = self
                    .entry
                    .methods
                    .as_ref()
                    .map_or(true, |methods| methods.iter().any(|m| m == method));
                method_matches && glob.is_match(path)
            }
        }
    }

    fn is_catch_all(&self) -> bool {
        self.matcher.is_universal() && self.entry.methods.is_none()
    }
}

/// Immutable, ordered rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    name: String,
    discipline: MatchDiscipline,
    rules: Vec<CompiledRule>,
}

impl RuleTable {
    /// Build a table from entries that already end with a catch-all
    ///
    /// # Errors
    ///
    /// - `EmptyTable` if `entries` is empty
    /// - `MissingFallback` if the last entry is not universal and method-agnostic
    /// - `UnreachableRule` if a catch-all appears before the last position
    /// - `InvalidPattern` / `InvalidMethod` for malformed entries
    pub fn new(
        name: impl Into<String>,
        discipline: MatchDiscipline,
        entries: Vec<RuleEntry>,
    ) -> Result<Self> {
        let name = name.into();
        if entries.is_empty() {
            return Err(GateError::EmptyTable(name));
        }

        let rules = entries
            .into_iter()
            .map(|entry| Self::compile(discipline, entry))
            .collect::<Result<Vec<_>>>()?;

        let last = rules.len() - 1;
        if !rules[last].is_catch_all() {
            return Err(GateError::MissingFallback(name));
        }
        if let Some(index) = rules[..last].iter().position(CompiledRule::is_catch_all) {
            return Err(GateError::UnreachableRule { table: name, index });
        }

        tracing::debug!(
            "Built {} rule table '{}' with {} entries",
            discipline,
            name,
            rules.len()
        );

        Ok(RuleTable {
            name,
            discipline,
            rules,
        })
    }

    /// Build a table from specific entries and append the fallback sentinel
    pub fn with_fallback<I, S>(
        name: impl Into<String>,
        discipline: MatchDiscipline,
        mut entries: Vec<RuleEntry>,
        fallback: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let universal = match discipline {
            MatchDiscipline::Prefix => "/",
            MatchDiscipline::Glob => "*",
        };
        entries.push(RuleEntry::new(universal, fallback));
        Self::new(name, discipline, entries)
    }

    fn compile(discipline: MatchDiscipline, mut entry: RuleEntry) -> Result<CompiledRule> {
        if let Some(methods) = entry.methods.as_mut() {
            for method in methods.iter_mut() {
                *method = normalize_method(method)?;
            }
        }

        let matcher = match discipline {
            MatchDiscipline::Prefix => Matcher::Prefix(entry.pattern.clone()),
            MatchDiscipline::Glob => Matcher::Glob(CompiledPattern::new(&entry.pattern)?),
        };

        Ok(CompiledRule { entry, matcher })
    }

    /// Built-in consent table: resource families by path prefix
    pub fn consent_defaults() -> Self {
        Self::with_fallback(
            "consent",
            MatchDiscipline::Prefix,
            vec![
                RuleEntry::new("/api/analytics", [consent::ANALYTICS]),
                RuleEntry::new("/api/ads", [consent::MARKETING]),
                RuleEntry::new("/api/personalize", [consent::PERSONALIZATION]),
                RuleEntry::new("/api/user/preferences", [consent::FUNCTIONAL]),
            ],
            [consent::ESSENTIAL],
        )
        .unwrap_or_else(|e| unreachable!("built-in consent table is valid: {}", e))
    }

    /// Built-in capability table: exact routes by method and glob
    pub fn capability_defaults() -> Self {
        Self::with_fallback(
            "capability",
            MatchDiscipline::Glob,
            vec![
                RuleEntry::new("/api/files/*", [capability::FILE_READ]).with_methods(["GET"]),
                RuleEntry::new("/api/files/*", [capability::FILE_WRITE])
                    .with_methods(["POST", "PUT"]),
                RuleEntry::new("/api/files/*", [capability::FILE_DELETE]).with_methods(["DELETE"]),
                RuleEntry::new("/api/users/*", [capability::USER_READ]).with_methods(["GET"]),
                RuleEntry::new("/api/users/*", [capability::USER_WRITE])
                    .with_methods(["POST", "PUT", "PATCH"]),
                RuleEntry::new("/api/analytics/*", [capability::ANALYTICS_WRITE])
                    .with_methods(["POST"]),
            ],
            [capability::PUBLIC_READ],
        )
        .unwrap_or_else(|e| unreachable!("built-in capability table is valid: {}", e))
    }

    /// Find the first entry that applies to this request
    ///
    /// Always returns an entry: the last one is a catch-all.
    pub fn resolve(&self, method: &str, path: &str) -> &RuleEntry {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.applies_to(method, path))
            .unwrap_or_else(|| self.fallback_rule());
        &rule.entry
    }

    /// Permissions required for this request
    pub fn resolve_requirement(&self, method: &str, path: &str) -> &[String] {
        &self.resolve(method, path).requires
    }

    /// Requirement of the fallback sentinel
    pub fn default_requirement(&self) -> &[String] {
        &self.fallback_rule().entry.requires
    }

    fn fallback_rule(&self) -> &CompiledRule {
        // Non-empty by construction
        &self.rules[self.rules.len() - 1]
    }

    /// Table name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Matching discipline
    pub fn discipline(&self) -> MatchDiscipline {
        self.discipline
    }

    /// Declared entries, fallback last
    pub fn entries(&self) -> impl Iterator<Item = &RuleEntry> {
        self.rules.iter().map(|rule| &rule.entry)
    }

    /// Number of entries, fallback included
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Always false for a constructed table
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Uppercase a configured method and check it is a plain HTTP token
fn normalize_method(method: &str) -> Result<String> {
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(GateError::InvalidMethod(method.to_string()));
    }
    Ok(method.to_ascii_uppercase())
}
