//! Request-level facade over the engine and renderer

use crate::config::{GateConfig, GateSelection};
use crate::core::clock::Clock;
use crate::core::credential::{CapabilityVerifier, ConsentState};
use crate::core::engine::PolicyEngine;
use crate::core::render::{Decision, DecisionRenderer};
use crate::core::rules::RuleTable;
use crate::error::Result;
use crate::security_headers::security_headers;
use crate::transport::GateRequest;
use tracing::debug;

/// Decides whole requests and renders the outcome
///
/// Holds no per-request state; share it freely across connection tasks.
pub struct Gateway {
    engine: PolicyEngine,
    renderer: DecisionRenderer,
    selection: GateSelection,
    security_headers: bool,
}

impl Gateway {
    /// Gateway over an engine, running both gates, without security headers
    pub fn new(engine: PolicyEngine) -> Self {
        Gateway {
            engine,
            renderer: DecisionRenderer::new(),
            selection: GateSelection::Both,
            security_headers: false,
        }
    }

    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build a gateway from a checked configuration
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        Ok(GatewayBuilder::new().config(config)?.build())
    }

    /// Consent gate only
    pub fn consent(&self, request: &GateRequest) -> Decision {
        let consent = ConsentState::from_cookie(request.consent_cookie());
        let verdict = self.engine.decide_consent(&request.path, &consent);
        self.renderer.render(verdict)
    }

    /// Capability gate only
    pub fn capability(&self, request: &GateRequest) -> Decision {
        let token = request.capability_token();
        let verdict = self
            .engine
            .decide_capability(&request.method, &request.path, token.as_deref());
        self.renderer.render(verdict)
    }

    /// Run the configured gates in order, stopping at the first denial
    ///
    /// Forwarding metadata from each gate is merged, and the security header set is
    /// appended to the response headers when enabled.
    pub fn evaluate(&self, request: &GateRequest) -> Decision {
        let decision = match self.selection {
            GateSelection::Consent => self.consent(request),
            GateSelection::Capability => self.capability(request),
            GateSelection::Both => match self.consent(request) {
                Decision::Forward(mut metadata) => match self.capability(request) {
                    Decision::Forward(capability) => {
                        metadata.extend(capability);
                        Decision::Forward(metadata)
                    }
                    denied => denied,
                },
                denied => denied,
            },
        };

        match decision {
            Decision::Forward(mut metadata) => {
                if self.security_headers {
                    metadata.response_headers.extend(security_headers());
                }
                Decision::Forward(metadata)
            }
            Decision::Deny(denial) => {
                debug!(
                    "Denied {} {}: {}",
                    request.method, request.path, denial.reason
                );
                Decision::Deny(denial)
            }
        }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn selection(&self) -> GateSelection {
        self.selection
    }
}

/// Builder for [`Gateway`]
///
/// Unset tables fall back to the built-in ones.
///
/// ```rust
/// use gatehouse::{FixedClock, GateRequest, GateSelection, Gateway};
///
/// let gateway = Gateway::builder()
///     .selection(GateSelection::Capability)
///     .clock(FixedClock(1_700_000_000))
///     .cache_capacity(256)
///     .build();
///
/// let decision = gateway.evaluate(&GateRequest::new("GET", "/index.html"));
/// assert!(decision.is_allowed());
/// ```
pub struct GatewayBuilder {
    consent_rules: Option<RuleTable>,
    capability_rules: Option<RuleTable>,
    verifier: Option<Box<dyn CapabilityVerifier>>,
    clock: Option<Box<dyn Clock>>,
    cache_capacity: usize,
    realm: Option<String>,
    selection: GateSelection,
    security_headers: bool,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        GatewayBuilder {
            consent_rules: None,
            capability_rules: None,
            verifier: None,
            clock: None,
            cache_capacity: 0,
            realm: None,
            selection: GateSelection::Both,
            security_headers: false,
        }
    }

    /// Take tables, verifier, cache size, realm, mode and header policy from configuration
    pub fn config(mut self, config: &GateConfig) -> Result<Self> {
        config.check()?;
        self.consent_rules = Some(config.consent_table()?);
        self.capability_rules = Some(config.capability_table()?);
        self.verifier = Some(config.verifier());
        self.cache_capacity = config.cache.capacity;
        self.realm = Some(config.capability.realm.clone());
        self.selection = config.mode;
        self.security_headers = config.server.security_headers;
        Ok(self)
    }

    pub fn consent_rules(mut self, table: RuleTable) -> Self {
        self.consent_rules = Some(table);
        self
    }

    pub fn capability_rules(mut self, table: RuleTable) -> Self {
        self.capability_rules = Some(table);
        self
    }

    pub fn verifier(mut self, verifier: impl CapabilityVerifier + 'static) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Grant cache size; 0 disables caching
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn selection(mut self, selection: GateSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Append the static security header set to forwarded responses
    pub fn with_security_headers(mut self) -> Self {
        self.security_headers = true;
        self
    }

    pub fn build(self) -> Gateway {
        let mut engine = PolicyEngine::new(
            self.consent_rules.unwrap_or_else(RuleTable::consent_defaults),
            self.capability_rules
                .unwrap_or_else(RuleTable::capability_defaults),
        )
        .with_cache_capacity(self.cache_capacity);

        if let Some(verifier) = self.verifier {
            engine = engine.with_verifier(verifier);
        }
        if let Some(clock) = self.clock {
            engine = engine.with_clock(clock);
        }

        let renderer = match self.realm {
            Some(realm) => DecisionRenderer::new().with_realm(realm),
            None => DecisionRenderer::new(),
        };

        Gateway {
            engine,
            renderer,
            selection: self.selection,
            security_headers: self.security_headers,
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::credential::CapabilityGrant;
    use crate::core::engine::ReasonCode;
    use crate::core::render::headers;
    use crate::transport::CAPABILITY_HEADER;

    const NOW: i64 = 1_700_000_000;

    fn token(capabilities: &[&str]) -> String {
        CapabilityGrant::new(capabilities.iter().copied(), NOW)
            .expires_in(3600)
            .with_issuer("tests")
            .encode()
            .unwrap()
    }

    fn gateway(selection: GateSelection) -> Gateway {
        Gateway::builder()
            .selection(selection)
            .clock(FixedClock(NOW))
            .build()
    }

    #[test]
    fn test_both_runs_consent_first() {
        let gateway = gateway(GateSelection::Both);
        // No consent and no token: the consent gate answers
        let request = GateRequest::new("POST", "/api/analytics/events");
        match gateway.evaluate(&request) {
            Decision::Deny(denial) => assert_eq!(denial.reason, ReasonCode::ConsentRequired),
            Decision::Forward(_) => panic!("expected denial"),
        }

        // Consent granted: the capability gate answers
        let request = request.with_header("Cookie", "user-consent=%7B%22analytics%22%3Atrue%7D");
        match gateway.evaluate(&request) {
            Decision::Deny(denial) => assert_eq!(denial.reason, ReasonCode::NoCapability),
            Decision::Forward(_) => panic!("expected denial"),
        }
    }

    #[test]
    fn test_both_merges_forwarding_metadata() {
        let gateway = gateway(GateSelection::Both);
        let request = GateRequest::new("POST", "/api/analytics/events")
            .with_header("Cookie", "user-consent=%7B%22analytics%22%3Atrue%7D")
            .with_header(CAPABILITY_HEADER, token(&["analytics.write"]));

        match gateway.evaluate(&request) {
            Decision::Forward(metadata) => {
                assert_eq!(metadata.response_header(headers::CONSENT_LEVEL), Some("analytics"));
                assert_eq!(
                    metadata.response_header(headers::CAPABILITY_USED),
                    Some("analytics.write")
                );
                assert_eq!(
                    metadata.request_header(headers::CAPABILITY_GRANTED_BY),
                    Some("tests")
                );
                assert!(metadata.response_header("X-Secured-By").is_none());
            }
            Decision::Deny(denial) => panic!("unexpected denial: {:?}", denial),
        }
    }

    #[test]
    fn test_single_mode_ignores_other_gate() {
        let consent_only = gateway(GateSelection::Consent);
        // Writes need a capability, but the consent gate alone allows them
        assert!(consent_only
            .evaluate(&GateRequest::new("DELETE", "/api/files/a"))
            .is_allowed());

        let capability_only = gateway(GateSelection::Capability);
        let request = GateRequest::new("GET", "/api/analytics/summary");
        assert!(capability_only.evaluate(&request).is_allowed());
    }

    #[test]
    fn test_security_headers_on_forward_only() {
        let gateway = Gateway::builder()
            .clock(FixedClock(NOW))
            .with_security_headers()
            .build();

        match gateway.evaluate(&GateRequest::new("GET", "/")) {
            Decision::Forward(metadata) => {
                assert_eq!(metadata.response_header("X-Frame-Options"), Some("DENY"));
                assert_eq!(metadata.response_header("X-Secured-By"), Some("gatehouse"));
            }
            Decision::Deny(denial) => panic!("unexpected denial: {:?}", denial),
        }

        match gateway.evaluate(&GateRequest::new("POST", "/api/files/a")) {
            Decision::Deny(denial) => assert!(denial.header("X-Frame-Options").is_none()),
            Decision::Forward(_) => panic!("expected denial"),
        }
    }

    #[test]
    fn test_custom_realm() {
        let gateway = Gateway::builder()
            .selection(GateSelection::Capability)
            .realm("files")
            .build();
        match gateway.evaluate(&GateRequest::new("PUT", "/api/files/a")) {
            Decision::Deny(denial) => assert_eq!(
                denial.header(headers::WWW_AUTHENTICATE),
                Some("Capability realm=\"files\"")
            ),
            Decision::Forward(_) => panic!("expected denial"),
        }
    }

    #[test]
    fn test_from_default_config() {
        let gateway = Gateway::from_config(&GateConfig::default()).unwrap();
        assert_eq!(gateway.selection(), GateSelection::Both);
        assert_eq!(gateway.engine().capability_rules().len(), 7);
    }

    #[test]
    fn test_token_from_query() {
        let gateway = gateway(GateSelection::Capability);
        let target = format!(
            "/api/files/report.pdf?capability={}",
            url::form_urlencoded::byte_serialize(token(&["file.read"]).as_bytes())
                .collect::<String>()
        );
        assert!(gateway
            .evaluate(&GateRequest::from_target("GET", &target))
            .is_allowed());
    }
}
