//! Rendering verdicts into HTTP-facing artifacts
//!
//! A denial becomes a complete 403 response. An allowance becomes header metadata:
//! headers to attach to the request before forwarding, and headers to attach to the
//! origin's response afterwards. Nothing here performs I/O.

use super::engine::{GateMode, ReasonCode, Verdict};
use serde::{Deserialize, Serialize};

/// Header names emitted by the gate
pub mod headers {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

    pub const CONSENT_REQUIRED: &str = "X-Consent-Required";
    pub const CONSENT_GATE: &str = "X-Consent-Gate";
    pub const CONSENT_LEVEL: &str = "X-Consent-Level";
    pub const CONSENT_VERIFIED: &str = "X-Consent-Verified";

    pub const CAPABILITY_ERROR: &str = "X-Capability-Error";
    pub const CAPABILITY_REQUIRED: &str = "X-Capability-Required";
    pub const CAPABILITY_GATEWAY: &str = "X-Capability-Gateway";
    pub const CAPABILITY_USED: &str = "X-Capability-Used";
    pub const CAPABILITY_GRANTED_BY: &str = "X-Capability-Granted-By";
    pub const VERIFIED_CAPABILITY: &str = "X-Verified-Capability";
}

/// Status code of every denial
pub const DENIAL_STATUS: u16 = 403;

const ENFORCED: &str = "enforced";
const UNKNOWN_ISSUER: &str = "unknown";
const CAPABILITY_HINT: &str = "Include X-Capability-Token header with valid capability token";

/// A header to set, name first
pub type Header = (&'static str, String);

/// JSON body of a denial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DenialBody {
    Consent {
        error: ReasonCode,
        message: String,
        required_consent: Vec<String>,
        current_consent: Vec<String>,
    },
    Capability {
        error: ReasonCode,
        message: String,
        required: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        granted: Option<Vec<String>>,
        hint: String,
    },
}

/// Complete response for a denied request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialResponse {
    pub status: u16,
    pub reason: ReasonCode,
    pub headers: Vec<Header>,
    pub body: DenialBody,
}

impl DenialResponse {
    /// Serialized JSON body
    pub fn body_json(&self) -> String {
        // Strings and string lists only; serialization cannot fail
        serde_json::to_string(&self.body).unwrap_or_default()
    }

    /// First value of a header, by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Headers to attach around forwarding an allowed request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardingMetadata {
    /// Set on the request before it is sent to the origin
    pub request_headers: Vec<Header>,
    /// Set on the origin's response before it is returned
    pub response_headers: Vec<Header>,
}

impl ForwardingMetadata {
    /// Merge another gate's metadata after this one
    pub fn extend(&mut self, other: ForwardingMetadata) {
        self.request_headers.extend(other.request_headers);
        self.response_headers.extend(other.response_headers);
    }

    /// First response header value, by case-insensitive name
    pub fn response_header(&self, name: &str) -> Option<&str> {
        find_header(&self.response_headers, name)
    }

    /// First request header value, by case-insensitive name
    pub fn request_header(&self, name: &str) -> Option<&str> {
        find_header(&self.request_headers, name)
    }
}

/// What the gate wants done with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answer with this response; the origin is never contacted
    Deny(DenialResponse),
    /// Forward to the origin with this metadata attached
    Forward(ForwardingMetadata),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Forward(_))
    }
}

/// Turns verdicts into responses or forwarding metadata
#[derive(Debug, Clone)]
pub struct DecisionRenderer {
    realm: String,
}

impl DecisionRenderer {
    pub fn new() -> Self {
        DecisionRenderer {
            realm: "API".to_string(),
        }
    }

    /// Realm advertised in `WWW-Authenticate` on capability denials
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Consume a verdict and render it
    pub fn render(&self, verdict: Verdict) -> Decision {
        match (verdict.mode, verdict.allowed) {
            (GateMode::Consent, false) => Decision::Deny(self.consent_denial(verdict)),
            (GateMode::Capability, false) => Decision::Deny(self.capability_denial(verdict)),
            (GateMode::Consent, true) => Decision::Forward(Self::consent_forwarding(&verdict)),
            (GateMode::Capability, true) => {
                Decision::Forward(Self::capability_forwarding(&verdict))
            }
        }
    }

    fn consent_denial(&self, verdict: Verdict) -> DenialResponse {
        let required = verdict.required_list();
        let message = format!(
            "This resource requires consent: {}",
            verdict.required.join(", ")
        );

        DenialResponse {
            status: DENIAL_STATUS,
            reason: verdict.reason,
            headers: vec![
                (headers::CONTENT_TYPE, "application/json".to_string()),
                (headers::CONSENT_REQUIRED, required),
                (headers::CONSENT_GATE, ENFORCED.to_string()),
            ],
            body: DenialBody::Consent {
                error: verdict.reason,
                message,
                required_consent: verdict.required,
                current_consent: verdict.granted,
            },
        }
    }

    fn capability_denial(&self, verdict: Verdict) -> DenialResponse {
        let message = match verdict.reason {
            ReasonCode::NoCapability => {
                "Capability token required for this request".to_string()
            }
            ReasonCode::InvalidCapability => "Capability token is invalid or expired".to_string(),
            _ => format!("Missing capability: {}", verdict.required.join(", ")),
        };
        // Only a decoded grant has a capability list to report
        let granted = match verdict.reason {
            ReasonCode::InsufficientCapability => Some(verdict.granted),
            _ => None,
        };

        DenialResponse {
            status: DENIAL_STATUS,
            reason: verdict.reason,
            headers: vec![
                (headers::CONTENT_TYPE, "application/json".to_string()),
                (headers::CAPABILITY_ERROR, verdict.reason.to_string()),
                (headers::CAPABILITY_REQUIRED, verdict.required.join(",")),
                (headers::CAPABILITY_GATEWAY, ENFORCED.to_string()),
                (
                    headers::WWW_AUTHENTICATE,
                    format!("Capability realm=\"{}\"", self.realm),
                ),
            ],
            body: DenialBody::Capability {
                error: verdict.reason,
                message,
                required: verdict.required,
                granted,
                hint: CAPABILITY_HINT.to_string(),
            },
        }
    }

    fn consent_forwarding(verdict: &Verdict) -> ForwardingMetadata {
        ForwardingMetadata {
            request_headers: Vec::new(),
            response_headers: vec![
                (headers::CONSENT_LEVEL, verdict.required_list()),
                (headers::CONSENT_VERIFIED, "true".to_string()),
            ],
        }
    }

    fn capability_forwarding(verdict: &Verdict) -> ForwardingMetadata {
        let used = verdict.required_list();
        let issuer = verdict
            .issuer
            .clone()
            .unwrap_or_else(|| UNKNOWN_ISSUER.to_string());

        ForwardingMetadata {
            request_headers: vec![
                (headers::VERIFIED_CAPABILITY, used.clone()),
                (headers::CAPABILITY_GRANTED_BY, issuer.clone()),
            ],
            response_headers: vec![
                (headers::CAPABILITY_USED, used),
                (headers::CAPABILITY_GRANTED_BY, issuer),
                (headers::CAPABILITY_GATEWAY, ENFORCED.to_string()),
            ],
        }
    }
}

impl Default for DecisionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
