//! Fuzz harness for the signer-chain pattern parser and matcher.
//!
//! Input is split on the first NUL: the pattern, then newline-separated
//! `subject|issuer` certificates. Neither parsing nor matching may panic.

#![no_main]
use libfuzzer_sys::fuzz_target;
use warden_core::{match_chain, parse_chain_element, parse_pattern, ChainCert};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (pattern, chain) = text.split_once('\0').unwrap_or((text, ""));

    let Ok(pattern) = parse_pattern(pattern) else {
        return;
    };
    let certs: Vec<ChainCert> = chain
        .lines()
        .map(|line| match line.split_once('|') {
            Some((subject, issuer)) => ChainCert::new(subject, issuer),
            None => ChainCert::root(line),
        })
        .collect();
    for cert in &certs {
        let _ = parse_chain_element(&cert.subject);
    }

    let names: Vec<&str> = certs.iter().map(|c| c.subject.as_str()).collect();
    let _ = pattern.matches_names(&names);
    let _ = match_chain(&certs, &pattern);
});
