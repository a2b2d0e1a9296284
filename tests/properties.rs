//! Property tests for rule resolution and token expiry

use gatehouse::core::rules::capability::PUBLIC_READ;
use gatehouse::core::rules::consent::ESSENTIAL;
use gatehouse::{
    CapabilityGrant, CompiledPattern, ConsentState, FixedClock, PatternMatcher, PolicyEngine,
    ReasonCode,
};
use proptest::prelude::*;

const NOW: i64 = 1_700_000_000;

/// Path segment that is never `.` or `..`
fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_-][a-z0-9_.-]{0,11}"
}

fn path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..6).prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Paths outside every declared consent prefix
fn unclassified_path() -> impl Strategy<Value = String> {
    path().prop_filter("must avoid /api", |p| !p.starts_with("/api"))
}

fn consent_state() -> impl Strategy<Value = ConsentState> {
    prop::collection::btree_map(
        prop::sample::select(vec![
            "essential",
            "functional",
            "analytics",
            "marketing",
            "personalization",
        ]),
        any::<bool>(),
        0..5,
    )
    .prop_map(|map| {
        map.into_iter().fold(ConsentState::empty(), |state, (category, granted)| {
            if granted {
                state.grant(category)
            } else {
                state.withhold(category)
            }
        })
    })
}

proptest! {
    #[test]
    fn prop_unclassified_paths_allowed_under_essential(
        path in unclassified_path(),
        consent in consent_state(),
    ) {
        let engine = PolicyEngine::with_defaults();
        let verdict = engine.decide_consent(&path, &consent);
        prop_assert!(verdict.allowed);
        prop_assert_eq!(verdict.required, vec![ESSENTIAL.to_string()]);
    }

    #[test]
    fn prop_undeclared_paths_public_for_get(path in unclassified_path()) {
        let engine = PolicyEngine::with_defaults().with_clock(FixedClock(NOW));

        let get = engine.decide_capability("GET", &path, None);
        prop_assert!(get.allowed);
        prop_assert_eq!(get.required, vec![PUBLIC_READ.to_string()]);

        let post = engine.decide_capability("POST", &path, None);
        prop_assert_eq!(post.reason, ReasonCode::NoCapability);
    }

    #[test]
    fn prop_compiled_pattern_agrees_with_matcher(
        literals in prop::collection::vec("[a-z/.]{0,4}", 1..5),
        path in "[a-z/.]{0,16}",
    ) {
        let pattern = literals.join("*");
        prop_assume!(!pattern.is_empty());

        let compiled = CompiledPattern::new(&pattern).unwrap();
        prop_assert_eq!(
            compiled.is_match(&path),
            PatternMatcher::matches(&path, &pattern),
            "pattern {:?} path {:?}", pattern, path
        );
    }

    #[test]
    fn prop_tokens_without_expiry_never_expire(
        issued_at in any::<i64>(),
        now in any::<i64>(),
    ) {
        let grant = CapabilityGrant::new(["file.read"], issued_at);
        prop_assert!(!grant.is_expired_at(now));
        prop_assert!(grant.validate_at(now).is_ok());
    }

    #[test]
    fn prop_past_expiry_always_invalid(
        age in 0i64..1_000_000,
        lifetime in 1i64..1_000_000,
        path in path(),
    ) {
        let expires_at = NOW - age;
        let token = CapabilityGrant::new(["file.read", "public.read"], expires_at - lifetime)
            .expires_at(expires_at)
            .encode()
            .unwrap();

        let engine = PolicyEngine::with_defaults().with_clock(FixedClock(NOW));
        for method in ["GET", "POST", "DELETE"] {
            let verdict = engine.decide_capability(method, &path, Some(&token));
            prop_assert_eq!(verdict.reason, ReasonCode::InvalidCapability);
        }
    }

    #[test]
    fn prop_future_expiry_valid(remaining in 1i64..1_000_000) {
        let token = CapabilityGrant::new(["file.read"], NOW)
            .expires_at(NOW + remaining)
            .encode()
            .unwrap();
        let engine = PolicyEngine::with_defaults().with_clock(FixedClock(NOW));
        prop_assert!(engine.decide_capability("GET", "/api/files/x", Some(&token)).allowed);
    }

    #[test]
    fn prop_consent_decode_never_panics(raw in ".{0,64}") {
        let state = ConsentState::decode(&raw);
        prop_assert!(state.granted().len() <= raw.len());
    }

    #[test]
    fn prop_normalize_is_idempotent(path in "[a-fA-F0-9sx./%~_-]{0,32}") {
        let once = PatternMatcher::normalize(&path);
        prop_assert!(once.starts_with('/'));
        prop_assert_eq!(PatternMatcher::normalize(&once), once.clone());
    }
}
