//! Decision core: rule tables, credentials and the policy engine

pub mod cache;
pub mod clock;
pub mod credential;
pub mod engine;
pub mod pattern;
pub mod render;
pub mod rules;

pub use cache::GrantCache;
pub use clock::{Clock, FixedClock, SystemClock};
pub use credential::{
    CapabilityGrant, CapabilityVerifier, ConsentState, CredentialError, TrustedIssuers,
    UnsignedTokenVerifier,
};
pub use engine::{GateMode, PolicyEngine, ReasonCode, Verdict};
pub use pattern::{CompiledPattern, PatternMatcher};
pub use render::{Decision, DecisionRenderer, DenialBody, DenialResponse, ForwardingMetadata};
pub use rules::{MatchDiscipline, RuleEntry, RuleTable};
