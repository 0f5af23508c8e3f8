use warden_core::{match_chain, parse_pattern, ChainCert, ChainMatch, MatchError};

use super::super::args::MatchArgs;
use crate::exit_codes::{MALFORMED, NOT_FOUND, SUCCESS};

pub fn run(args: MatchArgs) -> anyhow::Result<i32> {
    let pattern = match parse_pattern(&args.pattern) {
        Ok(pattern) => pattern,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(MALFORMED);
        }
    };

    if args.certs.is_empty() {
        return Ok(match pattern.matches_names(args.dns.as_slice()) {
            Ok(true) => {
                println!("match");
                SUCCESS
            }
            Ok(false) => {
                println!("no match");
                NOT_FOUND
            }
            Err(e) => report(&e),
        });
    }

    let chain: Vec<ChainCert> = args.certs.iter().map(|cert| parse_cert(cert)).collect();
    Ok(match match_chain(&chain, &pattern) {
        Ok(ChainMatch::Matched { anchor }) => {
            match anchor {
                Some(index) => println!("match anchor={index}"),
                None => println!("match anchor=none"),
            }
            SUCCESS
        }
        Ok(ChainMatch::NoMatch) => {
            println!("no match");
            NOT_FOUND
        }
        Err(e) => report(&e),
    })
}

/// `SUBJECT|ISSUER`, or a bare `SUBJECT` for a self-signed certificate.
fn parse_cert(text: &str) -> ChainCert {
    match text.split_once('|') {
        Some((subject, issuer)) => ChainCert::new(subject.trim(), issuer.trim()),
        None => ChainCert::root(text.trim()),
    }
}

fn report(error: &MatchError) -> i32 {
    eprintln!("error: {error}");
    MALFORMED
}
