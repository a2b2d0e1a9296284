#![no_main]
use gatehouse::{CapabilityGrant, FixedClock, PolicyEngine, ReasonCode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let engine = PolicyEngine::with_defaults().with_clock(FixedClock(1_700_000_000));
    let verdict = engine.decide_capability("DELETE", "/api/files/x", Some(raw));

    // Hostile tokens may be rejected but never accepted without the capability
    match CapabilityGrant::decode(raw) {
        Ok(grant) if !grant.is_expired_at(1_700_000_000) => {
            assert_eq!(verdict.allowed, grant.has("file.delete"));
        }
        _ if raw.trim().is_empty() => assert_eq!(verdict.reason, ReasonCode::NoCapability),
        _ => assert_eq!(verdict.reason, ReasonCode::InvalidCapability),
    }
});
