//! # Gatehouse - HTTP Consent and Capability Gate
//!
//! `gatehouse` decides, before a request reaches its origin, whether the request may
//! proceed. Two independent gating modes are provided:
//!
//! - **Consent mode**: path prefixes map to privacy-consent categories, checked against
//!   the caller's `user-consent` cookie
//! - **Capability mode**: method and path globs map to required capabilities, checked
//!   against a bearer capability token
//!
//! Rule tables are declared once and never change. Every decision is a pure function of
//! the tables, the request and the current time.
//!
//! ## Quick Start
//!
//! ```rust
//! use gatehouse::{CapabilityGrant, Decision, GateRequest, Gateway};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::builder().build();
//!
//! // Anonymous reads of public resources are allowed
//! let decision = gateway.evaluate(&GateRequest::new("GET", "/index.html"));
//! assert!(decision.is_allowed());
//!
//! // Writes need a capability
//! let token = CapabilityGrant::new(["file.write"], chrono::Utc::now().timestamp())
//!     .expires_in(3600)
//!     .encode()?;
//! let request = GateRequest::new("PUT", "/api/files/report.pdf")
//!     .with_header("X-Capability-Token", token);
//!
//! match gateway.evaluate(&request) {
//!     Decision::Forward(metadata) => assert!(!metadata.request_headers.is_empty()),
//!     Decision::Deny(denial) => panic!("denied: {}", denial.body_json()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use gatehouse::{GateConfig, Gateway, Result};
//!
//! # fn main() -> Result<()> {
//! let config = GateConfig::load("gatehouse.toml")?;
//! let gateway = Gateway::from_config(&config)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod security_headers;
pub mod transport;

pub use crate::config::{GateConfig, GateSelection};
pub use crate::core::{
    CapabilityGrant, CapabilityVerifier, Clock, CompiledPattern, ConsentState, CredentialError,
    Decision, DecisionRenderer, DenialBody, DenialResponse, FixedClock, ForwardingMetadata,
    GateMode, GrantCache, MatchDiscipline, PatternMatcher, PolicyEngine, ReasonCode, RuleEntry,
    RuleTable, SystemClock, TrustedIssuers, UnsignedTokenVerifier, Verdict,
};
pub use crate::error::{GateError, Result};
pub use crate::gateway::{Gateway, GatewayBuilder};
pub use crate::security_headers::SECURITY_HEADERS;
pub use crate::transport::{GateRequest, OutboundRequest};
