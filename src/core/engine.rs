//! Policy decision engine
//!
//! Two stateless gating modes share one engine:
//! - Consent mode checks a decoded [`ConsentState`] against a prefix rule table.
//! - Capability mode verifies a bearer token and checks its grant against a glob rule
//!   table keyed by method.
//!
//! A denial is an ordinary [`Verdict`], never an error. Request paths are normalized
//! before resolution, and the clock is read once per decision.

use super::cache::GrantCache;
use super::clock::{Clock, SystemClock};
use super::credential::{
    CapabilityGrant, CapabilityVerifier, ConsentState, CredentialError, UnsignedTokenVerifier,
};
use super::pattern::PatternMatcher;
use super::rules::RuleTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// The only method an unauthenticated caller may use on default resources
pub const READ_METHOD: &str = "GET";

/// Outcome classification of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Request may proceed
    Allowed,
    /// Consent mode: a required category was not granted
    ConsentRequired,
    /// Capability mode: no token, and the request needs more than public read
    NoCapability,
    /// Capability mode: token undecodable, unverifiable or expired
    InvalidCapability,
    /// Capability mode: token valid but lacks the required capability
    InsufficientCapability,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Allowed => "Allowed",
            ReasonCode::ConsentRequired => "ConsentRequired",
            ReasonCode::NoCapability => "NoCapability",
            ReasonCode::InvalidCapability => "InvalidCapability",
            ReasonCode::InsufficientCapability => "InsufficientCapability",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gate produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Consent,
    Capability,
}

/// The engine's decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Gate that decided
    pub mode: GateMode,
    /// Whether the request may be forwarded
    pub allowed: bool,
    /// Permissions resolved from the rule table
    pub required: Vec<String>,
    /// Permissions the caller presented (granted categories or capabilities)
    pub granted: Vec<String>,
    /// Outcome classification
    pub reason: ReasonCode,
    /// Grant issuer, when a token was verified
    pub issuer: Option<String>,
}

impl Verdict {
    fn consent(allowed: bool, required: Vec<String>, granted: Vec<String>) -> Self {
        Verdict {
            mode: GateMode::Consent,
            allowed,
            required,
            granted,
            reason: if allowed {
                ReasonCode::Allowed
            } else {
                ReasonCode::ConsentRequired
            },
            issuer: None,
        }
    }

    fn capability(reason: ReasonCode, required: Vec<String>) -> Self {
        Verdict {
            mode: GateMode::Capability,
            allowed: reason == ReasonCode::Allowed,
            required,
            granted: Vec::new(),
            reason,
            issuer: None,
        }
    }

    /// Required permissions joined with `,`
    pub fn required_list(&self) -> String {
        self.required.join(",")
    }
}

/// Stateless decision engine over two immutable rule tables
pub struct PolicyEngine {
    consent_rules: RuleTable,
    capability_rules: RuleTable,
    verifier: Box<dyn CapabilityVerifier>,
    clock: Box<dyn Clock>,
    cache: Option<GrantCache>,
}

impl PolicyEngine {
    /// Create an engine with the unsigned token verifier, the system clock and no cache
    pub fn new(consent_rules: RuleTable, capability_rules: RuleTable) -> Self {
        PolicyEngine {
            consent_rules,
            capability_rules,
            verifier: Box::new(UnsignedTokenVerifier),
            clock: Box::new(SystemClock),
            cache: None,
        }
    }

    /// Create an engine with the built-in rule tables
    pub fn with_defaults() -> Self {
        Self::new(RuleTable::consent_defaults(), RuleTable::capability_defaults())
    }

    /// Replace the capability verifier
    pub fn with_verifier(mut self, verifier: impl CapabilityVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Cache verified grants; a capacity of 0 disables caching
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = GrantCache::new(capacity);
        self
    }

    /// Consent mode: every required category must be granted
    ///
    /// Categories in the table's fallback requirement (the essential category) are
    /// always satisfied, so unclassified resources are served regardless of consent.
    pub fn decide_consent(&self, path: &str, consent: &ConsentState) -> Verdict {
        let path = PatternMatcher::normalize(path);
        // Prefix tables ignore the method
        let required = self.consent_rules.resolve_requirement("", &path).to_vec();
        let implicit = self.consent_rules.default_requirement();

        let allowed = required
            .iter()
            .all(|category| implicit.contains(category) || consent.is_granted(category));

        let verdict = Verdict::consent(allowed, required, consent.granted());
        debug!(
            "Consent decision for {}: {} (requires {})",
            path,
            verdict.reason,
            verdict.required_list()
        );
        verdict
    }

    /// Capability mode: verify the token, then check the route's required capability
    ///
    /// Without a token only `GET` requests to resources that resolve to the table's
    /// default permission are allowed. A present but unusable token is always denied,
    /// even for public resources.
    pub fn decide_capability(&self, method: &str, path: &str, token: Option<&str>) -> Verdict {
        let now = self.clock.now_unix();
        let path = PatternMatcher::normalize(path);
        let required = self
            .capability_rules
            .resolve_requirement(method, &path)
            .to_vec();

        let token = token.filter(|t| !t.trim().is_empty());
        let verdict = match token {
            None => {
                let public = required.as_slice() == self.capability_rules.default_requirement();
                if public && method == READ_METHOD {
                    Verdict::capability(ReasonCode::Allowed, required)
                } else {
                    Verdict::capability(ReasonCode::NoCapability, required)
                }
            }
            Some(raw) => match self.verify(raw, now) {
                Err(e) => {
                    warn!("Rejected capability token for {} {}: {}", method, path, e);
                    Verdict::capability(ReasonCode::InvalidCapability, required)
                }
                Ok(grant) => {
                    let reason = if grant.has_all(&required) {
                        ReasonCode::Allowed
                    } else {
                        ReasonCode::InsufficientCapability
                    };
                    let mut verdict = Verdict::capability(reason, required);
                    verdict.granted = grant.capabilities;
                    verdict.issuer = grant.issuer;
                    verdict
                }
            },
        };

        debug!(
            "Capability decision for {} {}: {} (requires {})",
            method,
            path,
            verdict.reason,
            verdict.required_list()
        );
        verdict
    }

    /// Verify a token and check expiry against `now`, consulting the cache first
    fn verify(&self, raw: &str, now: i64) -> Result<CapabilityGrant, CredentialError> {
        if let Some(cache) = &self.cache {
            if let Some(grant) = cache.get(raw, now) {
                debug!("Capability grant served from cache");
                return Ok(grant);
            }
        }

        let grant = self.verifier.verify(raw)?.validate_at(now)?;

        if let Some(cache) = &self.cache {
            cache.put(raw, &grant, now);
        }
        Ok(grant)
    }

    /// Consent rule table
    pub fn consent_rules(&self) -> &RuleTable {
        &self.consent_rules
    }

    /// Capability rule table
    pub fn capability_rules(&self) -> &RuleTable {
        &self.capability_rules
    }

    /// Number of cached grants (0 when caching is disabled)
    pub fn cache_size(&self) -> usize {
        self.cache.as_ref().map_or(0, GrantCache::len)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
