//! Distinguished-name parsing and per-element matching.

use super::super::{Ava, AvaValue, DnPattern, Rdn, RdnGroups};
use crate::errors::PatternError;

struct RawAva {
    name: String,
    value: Vec<u8>,
    /// Value contained quoted or escaped characters.
    literal: bool,
}

pub(crate) fn parse_name_impl(dn: &str) -> Result<RdnGroups, PatternError> {
    let rdns = parse_rdns(dn, dn, false)?;
    Ok(RdnGroups { rdns })
}

pub(crate) fn parse_dn_pattern_impl(text: &str) -> Result<DnPattern, PatternError> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('*') {
        let rest = rest.trim_start();
        let Some(body) = rest.strip_prefix(',') else {
            return Err(PatternError::malformed(
                text,
                "unexpected characters after '*'",
            ));
        };
        if body.trim().is_empty() {
            return Err(PatternError::malformed(text, "expected RDN after '*,'"));
        }
        return Ok(DnPattern {
            any_prefix: true,
            rdns: parse_rdns(body, text, true)?,
        });
    }

    Ok(DnPattern {
        any_prefix: false,
        rdns: parse_rdns(trimmed, text, true)?,
    })
}

pub(crate) fn dn_matches_impl(element: &RdnGroups, pattern: &DnPattern) -> bool {
    let wanted = pattern.rdns.len();
    let have = element.rdns.len();
    if have < wanted || (!pattern.any_prefix && have != wanted) {
        return false;
    }

    // Compare from the tail; groups are whole RDNs so a multi-valued RDN
    // can never be split.
    let offset = have - wanted;
    pattern
        .rdns
        .iter()
        .zip(&element.rdns[offset..])
        .all(|(p, e)| rdn_matches(e, p))
}

fn rdn_matches(element: &Rdn, pattern: &Rdn) -> bool {
    if element.avas.len() != pattern.avas.len() {
        return false;
    }
    let mut used = vec![false; element.avas.len()];
    assign_avas(&element.avas, &pattern.avas, &mut used)
}

// Multi-valued RDNs are unordered sets; try each pairing.
fn assign_avas(element: &[Ava], pattern: &[Ava], used: &mut [bool]) -> bool {
    let Some((first, rest)) = pattern.split_first() else {
        return true;
    };
    for (idx, candidate) in element.iter().enumerate() {
        if used[idx] || !ava_matches(candidate, first) {
            continue;
        }
        used[idx] = true;
        if assign_avas(element, rest, used) {
            return true;
        }
        used[idx] = false;
    }
    false
}

fn ava_matches(element: &Ava, pattern: &Ava) -> bool {
    if element.name != pattern.name {
        return false;
    }
    match (&pattern.value, &element.value) {
        (AvaValue::Any, _) => true,
        (AvaValue::Exact(want), AvaValue::Exact(have)) => want == have,
        (AvaValue::Exact(_), AvaValue::Any) => false,
    }
}

fn parse_rdns(input: &str, source: &str, wildcards: bool) -> Result<Vec<Rdn>, PatternError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut rdns = Vec::new();
    let mut current: Vec<Ava> = Vec::new();
    let mut raw = RawAva::new();
    let mut in_value = false;
    let mut in_quote = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars
                    .next()
                    .ok_or_else(|| PatternError::malformed(source, "dangling escape character"))?;
                if !in_value {
                    return Err(PatternError::malformed(
                        source,
                        "escape character in attribute name",
                    ));
                }
                raw.literal = true;
                match (next.to_digit(16), chars.peek().and_then(|p| p.to_digit(16))) {
                    (Some(hi), Some(lo)) => {
                        chars.next();
                        raw.value.push((hi * 16 + lo) as u8);
                    }
                    _ => push_char(&mut raw.value, next),
                }
            }
            '"' if in_value => {
                in_quote = !in_quote;
                raw.literal = true;
            }
            _ if in_quote => push_char(&mut raw.value, c),
            '=' if !in_value => in_value = true,
            ',' | '+' => {
                if !in_value {
                    return Err(PatternError::malformed(source, "RDN without '='"));
                }
                current.push(raw.finish(source, wildcards)?);
                raw = RawAva::new();
                in_value = false;
                if c == ',' {
                    rdns.push(Rdn::canonical(std::mem::take(&mut current)));
                }
            }
            _ if in_value => push_char(&mut raw.value, c),
            _ => raw.name.push(c),
        }
    }

    if in_quote {
        return Err(PatternError::malformed(source, "unterminated quote"));
    }
    if !in_value {
        return Err(PatternError::malformed(source, "RDN without '='"));
    }
    current.push(raw.finish(source, wildcards)?);
    rdns.push(Rdn::canonical(current));
    Ok(rdns)
}

fn push_char(buf: &mut Vec<u8>, c: char) {
    let mut tmp = [0u8; 4];
    buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
}

fn canonical_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl RawAva {
    fn new() -> Self {
        Self {
            name: String::new(),
            value: Vec::new(),
            literal: false,
        }
    }

    fn finish(self, source: &str, wildcards: bool) -> Result<Ava, PatternError> {
        let name = self.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(PatternError::malformed(source, "empty attribute name"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(PatternError::malformed(
                source,
                format!("invalid attribute name {name:?}"),
            ));
        }

        let text = String::from_utf8(self.value)
            .map_err(|_| PatternError::malformed(source, "escaped value is not valid UTF-8"))?;
        let value = canonical_text(&text);
        let value = if wildcards && !self.literal && value == "*" {
            AvaValue::Any
        } else {
            AvaValue::Exact(value)
        };
        Ok(Ava { name, value })
    }
}

impl Rdn {
    fn canonical(mut avas: Vec<Ava>) -> Self {
        avas.sort();
        Self { avas }
    }
}
