#![no_main]
use gatehouse::{ConsentState, PolicyEngine};
use libfuzzer_sys::fuzz_target;

// Any cookie value must decode to some state and yield a decision
fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let state = ConsentState::decode(raw);
    let engine = PolicyEngine::with_defaults();

    let verdict = engine.decide_consent("/api/analytics/events", &state);
    assert_eq!(verdict.allowed, state.is_granted("analytics"));

    let verdict = engine.decide_consent("/", &state);
    assert!(verdict.allowed);
});
