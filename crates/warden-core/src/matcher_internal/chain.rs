//! Chain validation and the wildcard walk.

use super::super::{ChainCert, ChainMatch, ChainPattern, ChainSegment, RdnGroups};
use super::dn;
use crate::errors::{ChainError, MatchError};

pub(crate) fn match_chain_impl(
    chain: &[ChainCert],
    pattern: &ChainPattern,
) -> Result<ChainMatch, MatchError> {
    if chain.is_empty() {
        return Ok(if pattern.is_empty() {
            ChainMatch::Matched { anchor: None }
        } else {
            ChainMatch::NoMatch
        });
    }

    let subjects = chain
        .iter()
        .map(|c| dn::parse_name_impl(&c.subject))
        .collect::<Result<Vec<_>, _>>()?;
    let issuers = chain
        .iter()
        .map(|c| dn::parse_name_impl(&c.issuer))
        .collect::<Result<Vec<_>, _>>()?;

    for index in 0..chain.len() - 1 {
        if issuers[index] != subjects[index + 1] {
            return Err(ChainError::Illegal {
                index,
                issuer: chain[index].issuer.clone(),
                next_subject: chain[index + 1].subject.clone(),
            }
            .into());
        }
    }

    let last = chain.len() - 1;
    if issuers[last] != subjects[last] {
        return Err(ChainError::Incomplete {
            length: chain.len(),
        }
        .into());
    }

    let anchor = (0..chain.len())
        .find(|&i| issuers[i] == subjects[i])
        .unwrap_or(last);

    if match_groups_impl(&subjects[..=anchor], &pattern.segments) {
        Ok(ChainMatch::Matched {
            anchor: Some(anchor),
        })
    } else {
        Ok(ChainMatch::NoMatch)
    }
}

/// Tabulated right-to-left walk.
///
/// `table[i][j]` holds whether `segments[i..]` consumes exactly `names[j..]`.
/// A `-` may consume any number of names, so each cell is computed once and
/// the walk stays polynomial for `-`-heavy patterns.
pub(crate) fn match_groups_impl(names: &[RdnGroups], segments: &[ChainSegment]) -> bool {
    let n = names.len();
    let m = segments.len();
    let mut table = vec![vec![false; n + 1]; m + 1];
    table[m][n] = true;

    for i in (0..m).rev() {
        for j in (0..=n).rev() {
            table[i][j] = match &segments[i] {
                ChainSegment::Single => j < n && table[i + 1][j + 1],
                ChainSegment::Multi => table[i + 1][j] || (j < n && table[i][j + 1]),
                ChainSegment::Name(pattern) => {
                    j < n && table[i + 1][j + 1] && dn::dn_matches_impl(&names[j], pattern)
                }
            };
        }
    }

    table[0][0]
}
