//! Chain-pattern splitting.

use super::super::{ChainPattern, ChainSegment};
use super::dn;
use crate::errors::PatternError;

pub(crate) fn parse_pattern_impl(text: &str) -> Result<ChainPattern, PatternError> {
    let pieces = split_segments(text)?;
    let mut segments = Vec::with_capacity(pieces.len());

    for piece in &pieces {
        let trimmed = piece.trim();
        let segment = match trimmed {
            "" => return Err(PatternError::malformed(text, "empty chain element")),
            "*" => ChainSegment::Single,
            "-" => ChainSegment::Multi,
            _ if trimmed.starts_with('-') => {
                return Err(PatternError::malformed(
                    text,
                    "unexpected characters after '-'",
                ))
            }
            // Errors are reported against the whole pattern, not the element.
            _ => ChainSegment::Name(dn::parse_dn_pattern_impl(trimmed).map_err(
                |PatternError::Malformed { reason, .. }| PatternError::malformed(text, reason),
            )?),
        };
        segments.push(segment);
    }

    Ok(ChainPattern {
        source: text.to_string(),
        segments,
    })
}

/// Split on `;` outside quotes. Escapes are kept so the DN parser sees them.
fn split_segments(text: &str) -> Result<Vec<String>, PatternError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars
                    .next()
                    .ok_or_else(|| PatternError::malformed(text, "dangling escape character"))?;
                current.push('\\');
                current.push(next);
            }
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ';' if !in_quote => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quote {
        return Err(PatternError::malformed(text, "unterminated quote"));
    }
    segments.push(current);
    Ok(segments)
}
