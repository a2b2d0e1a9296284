#![no_main]
use arbitrary::Arbitrary;
use gatehouse::{CompiledPattern, PatternMatcher};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    pattern: String,
    path: String,
}

// The compiled and the scanning matcher must always agree
fuzz_target!(|input: Input| {
    let Ok(compiled) = CompiledPattern::new(&input.pattern) else {
        return;
    };

    assert_eq!(
        compiled.is_match(&input.path),
        PatternMatcher::matches(&input.path, &input.pattern),
        "pattern {:?} path {:?}",
        input.pattern,
        input.path
    );

    let normalized = PatternMatcher::normalize(&input.path);
    assert_eq!(PatternMatcher::normalize(&normalized), normalized);
});
