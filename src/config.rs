//! Gate configuration
//!
//! Rule tables, cache sizing and server settings are declared once at startup, from
//! TOML or from the built-in defaults, and never change afterwards.
//!
//! ```toml
//! mode = "both"
//!
//! [consent]
//! essential = "essential"
//! rules = [
//!     { prefix = "/api/analytics", requires = ["analytics"] },
//! ]
//!
//! [capability]
//! default_permission = "public.read"
//! rules = [
//!     { permission = "file.read", methods = ["GET"], paths = ["/api/files/*"] },
//! ]
//!
//! [cache]
//! capacity = 1024
//!
//! [server]
//! listen = "127.0.0.1:8080"
//! origin = "http://127.0.0.1:3000"
//! ```

use crate::core::credential::{CapabilityVerifier, TrustedIssuers, UnsignedTokenVerifier};
use crate::core::engine::PolicyEngine;
use crate::core::rules::{MatchDiscipline, RuleEntry, RuleTable};
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Which gates run for each request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateSelection {
    /// Consent gate only
    Consent,
    /// Capability gate only
    Capability,
    /// Consent gate, then capability gate
    #[default]
    Both,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GateConfig {
    pub mode: GateSelection,

    #[validate(nested)]
    pub consent: ConsentConfig,

    #[validate(nested)]
    pub capability: CapabilityConfig,

    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub server: ServerConfig,
}

/// Consent rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsentConfig {
    /// Fallback category, always granted
    #[validate(length(min = 1))]
    pub essential: String,

    /// Prefix rules in evaluation order
    pub rules: Vec<ConsentRule>,
}

/// One consent rule: a path prefix and the categories it requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRule {
    pub prefix: String,
    pub requires: Vec<String>,
}

/// Capability rule table and token handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Fallback permission, implicitly held by unauthenticated `GET` requests
    #[validate(length(min = 1))]
    pub default_permission: String,

    /// Realm advertised in `WWW-Authenticate`
    #[validate(length(min = 1))]
    pub realm: String,

    /// If non-empty, only grants naming one of these issuers are accepted
    pub trusted_issuers: Vec<String>,

    /// Routes in evaluation order
    pub rules: Vec<CapabilityRule>,
}

/// One capability and the routes that require it
///
/// Expands to one table entry per path, in the order listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub permission: String,
    /// Absent means any method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    pub paths: Vec<String>,
}

/// Verified-grant cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached grants; 0 disables the cache
    #[validate(range(max = 1_000_000))]
    pub capacity: usize,
}

/// Reverse-proxy settings used by the server binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub listen: String,

    /// Origin base URL, scheme and authority only
    #[validate(length(min = 1))]
    pub origin: String,

    /// Add the static security header set to forwarded responses
    pub security_headers: bool,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        let table = RuleTable::consent_defaults();
        let fallback = table.default_requirement().to_vec();
        let entries: Vec<&RuleEntry> = table.entries().collect();
        let declared = &entries[..entries.len() - 1];

        ConsentConfig {
            essential: fallback.into_iter().next().unwrap_or_default(),
            rules: declared
                .iter()
                .map(|entry| ConsentRule {
                    prefix: entry.pattern.clone(),
                    requires: entry.requires.clone(),
                })
                .collect(),
        }
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        let table = RuleTable::capability_defaults();
        let fallback = table.default_requirement().to_vec();
        let entries: Vec<&RuleEntry> = table.entries().collect();
        let declared = &entries[..entries.len() - 1];

        CapabilityConfig {
            default_permission: fallback.into_iter().next().unwrap_or_default(),
            realm: "API".to_string(),
            trusted_issuers: Vec::new(),
            rules: declared
                .iter()
                .flat_map(|entry| {
                    entry.requires.iter().map(move |permission| CapabilityRule {
                        permission: permission.clone(),
                        methods: entry.methods.clone(),
                        paths: vec![entry.pattern.clone()],
                    })
                })
                .collect(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { capacity: 1024 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "127.0.0.1:8080".to_string(),
            origin: "http://127.0.0.1:3000".to_string(),
            security_headers: true,
        }
    }
}

impl GateConfig {
    /// Parse and check a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(source)?;
        config.check()?;
        Ok(config)
    }

    /// Load and check a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading gate configuration from {:?}", path.as_ref());
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GateError::Config(e.to_string()))
    }

    /// Validate fields, the origin URL and both rule tables
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let origin = url::Url::parse(&self.server.origin)
            .map_err(|e| GateError::Config(format!("server.origin: {}", e)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(GateError::Config(format!(
                "server.origin: unsupported scheme '{}'",
                origin.scheme()
            )));
        }

        self.consent_table()?;
        self.capability_table()?;
        Ok(())
    }

    /// Build the consent rule table, fallback appended
    pub fn consent_table(&self) -> Result<RuleTable> {
        let entries = self
            .consent
            .rules
            .iter()
            .map(|rule| RuleEntry::new(rule.prefix.clone(), rule.requires.clone()))
            .collect();
        RuleTable::with_fallback(
            "consent",
            MatchDiscipline::Prefix,
            entries,
            [self.consent.essential.clone()],
        )
    }

    /// Build the capability rule table, fallback appended
    pub fn capability_table(&self) -> Result<RuleTable> {
        let mut entries = Vec::new();
        for rule in &self.capability.rules {
            if rule.paths.is_empty() {
                return Err(GateError::Config(format!(
                    "capability '{}' lists no paths",
                    rule.permission
                )));
            }
            for path in &rule.paths {
                let entry = RuleEntry::new(path.clone(), [rule.permission.clone()]);
                entries.push(match &rule.methods {
                    Some(methods) => entry.with_methods(methods.clone()),
                    None => entry,
                });
            }
        }
        RuleTable::with_fallback(
            "capability",
            MatchDiscipline::Glob,
            entries,
            [self.capability.default_permission.clone()],
        )
    }

    /// Token verifier implied by `capability.trusted_issuers`
    pub fn verifier(&self) -> Box<dyn CapabilityVerifier> {
        if self.capability.trusted_issuers.is_empty() {
            Box::new(UnsignedTokenVerifier)
        } else {
            info!(
                "Accepting capability grants from issuers: {}",
                self.capability.trusted_issuers.join(", ")
            );
            Box::new(TrustedIssuers::new(
                UnsignedTokenVerifier,
                self.capability.trusted_issuers.clone(),
            ))
        }
    }

    /// Build a policy engine from this configuration
    pub fn build_engine(&self) -> Result<PolicyEngine> {
        Ok(
            PolicyEngine::new(self.consent_table()?, self.capability_table()?)
                .with_cache_capacity(self.cache.capacity)
                .with_verifier(self.verifier()),
        )
    }
}
