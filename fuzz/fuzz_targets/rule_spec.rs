//! Fuzz harness for the textual rule encoding: whatever parses must
//! encode to text that parses back to the same rule.

#![no_main]
use libfuzzer_sys::fuzz_target;
use warden_core::RuleSpec;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(spec) = RuleSpec::parse(text) {
        let encoded = spec.encode();
        assert_eq!(RuleSpec::parse(&encoded).as_ref(), Ok(&spec), "{encoded}");
    }
});
