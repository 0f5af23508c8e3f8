//! Signer and issuer name-chain matching.
//!
//! A chain pattern lists distinguished names from the leaf towards the
//! root, separated by `;`:
//!
//! ```text
//! cn=*, o=ACME; *          leaf in o=ACME, followed by exactly one issuer
//! -; cn=Root CA, o=ACME    any chain that ends at the ACME root
//! *, o=ACME, c=US          a single DN ending in o=ACME, c=US
//! ```
//!
//! | Token | Where | Meaning |
//! |-------|-------|---------|
//! | `*`   | whole chain element | exactly one element of any content |
//! | `-`   | whole chain element | zero or more elements |
//! | `*,`  | leading RDN of a DN | zero or more leading RDNs |
//! | `cn=*`| attribute value | any value for that attribute |
//!
//! Names are compared in canonical form: attribute names and values are
//! lower-cased, surrounding whitespace is dropped and inner whitespace
//! runs collapse to one space. Multi-valued RDNs (`+`) are compared as a
//! unit and never split by a wildcard.

use std::fmt;

use crate::errors::{MatchError, PatternError};

#[path = "matcher_internal/mod.rs"]
mod matcher_internal;

/// One `name=value` assertion inside an RDN.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ava {
    pub name: String,
    pub value: AvaValue,
}

/// Attribute value of an [`Ava`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AvaValue {
    Exact(String),
    /// `*` in a pattern: any value.
    Any,
}

/// A relative distinguished name. More than one AVA means multi-valued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub avas: Vec<Ava>,
}

/// A concrete distinguished name split into RDN groups, most specific first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RdnGroups {
    pub rdns: Vec<Rdn>,
}

impl RdnGroups {
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }
}

/// A DN pattern inside a chain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnPattern {
    /// Leading `*,`: the name may carry extra leading RDNs.
    pub any_prefix: bool,
    pub rdns: Vec<Rdn>,
}

/// One `;`-separated element of a chain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSegment {
    /// `*`
    Single,
    /// `-`
    Multi,
    Name(DnPattern),
}

/// A parsed chain pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPattern {
    source: String,
    segments: Vec<ChainSegment>,
}

impl ChainPattern {
    /// Parse a chain pattern. See [`parse_pattern`].
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        parse_pattern(text)
    }

    pub fn segments(&self) -> &[ChainSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a flat list of DNs.
    pub fn matches_names<S: AsRef<str>>(&self, names: &[S]) -> Result<bool, MatchError> {
        matches_names(names, self)
    }

    /// Match a certificate chain.
    pub fn match_chain(&self, chain: &[ChainCert]) -> Result<ChainMatch, MatchError> {
        match_chain(chain, self)
    }
}

impl fmt::Display for ChainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// One certificate of an already-verified chain, by name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCert {
    pub subject: String,
    pub issuer: String,
}

impl ChainCert {
    pub fn new(subject: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
        }
    }

    /// A self-signed certificate.
    pub fn root(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            issuer: subject.clone(),
            subject,
        }
    }
}

/// Outcome of [`match_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMatch {
    /// `anchor` is the index of the first self-signed certificate; `None`
    /// only for the empty chain.
    Matched { anchor: Option<usize> },
    NoMatch,
}

impl ChainMatch {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn anchor(&self) -> Option<usize> {
        match self {
            Self::Matched { anchor } => *anchor,
            Self::NoMatch => None,
        }
    }
}

/// Parse a chain pattern.
///
/// Splits on `;` outside quotes (`"` toggles a literal region, `\` escapes
/// the next character). Fails on unterminated quotes, a dangling escape, an
/// empty element, or characters following a bare `*` / `-`.
pub fn parse_pattern(text: &str) -> Result<ChainPattern, PatternError> {
    matcher_internal::pattern::parse_pattern_impl(text)
}

/// Parse a concrete DN into canonical RDN groups.
pub fn parse_chain_element(dn: &str) -> Result<RdnGroups, PatternError> {
    matcher_internal::dn::parse_name_impl(dn)
}

/// Whether one chain element matches one pattern element.
///
/// `*` and `-` accept any element here; their counting semantics are
/// applied by [`match_chain`] and [`matches_names`].
pub fn match_one(element: &RdnGroups, pattern: &ChainSegment) -> bool {
    match pattern {
        ChainSegment::Single | ChainSegment::Multi => true,
        ChainSegment::Name(dn) => matcher_internal::dn::dn_matches_impl(element, dn),
    }
}

/// Match a certificate chain against a pattern.
///
/// The chain must link (each issuer is the next subject) and end in a
/// self-signed certificate; otherwise [`ChainError`](crate::errors::ChainError)
/// is returned. The subjects up to and including the first self-signed
/// certificate are matched.
pub fn match_chain(chain: &[ChainCert], pattern: &ChainPattern) -> Result<ChainMatch, MatchError> {
    matcher_internal::chain::match_chain_impl(chain, pattern)
}

/// Match a flat list of DNs (leaf first) against a pattern.
pub fn matches_names<S: AsRef<str>>(names: &[S], pattern: &ChainPattern) -> Result<bool, MatchError> {
    let parsed = names
        .iter()
        .map(|n| parse_chain_element(n.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(matcher_internal::chain::match_groups_impl(
        &parsed,
        &pattern.segments,
    ))
}
