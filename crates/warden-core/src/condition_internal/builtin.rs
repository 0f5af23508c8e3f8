use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

use crate::condition::{
    Condition, ConditionFactory, ConditionInfo, ConditionScope, LOCATION_KIND, SIGNER_KIND,
};
use crate::errors::{ConditionError, MatchError};
use crate::matcher::ChainPattern;
use crate::view::UnitInfo;

/// Split `["value"]` or `["value" "!"]`.
fn pattern_and_negation<'a>(
    info: &'a ConditionInfo,
    kind: &str,
) -> Result<(&'a str, bool), ConditionError> {
    let invalid = |reason: &str| ConditionError::InvalidArguments {
        kind: kind.to_string(),
        reason: reason.to_string(),
    };
    match info.args.as_slice() {
        [value] => Ok((value.as_str(), false)),
        [value, bang] if bang == "!" => Ok((value.as_str(), true)),
        [_, other] => Err(invalid(&format!("expected \"!\" as second argument, got {other:?}"))),
        [] => Err(invalid("missing pattern argument")),
        _ => Err(invalid("too many arguments")),
    }
}

/// Satisfied when at least one of the unit's signer chains matches.
#[derive(Debug)]
pub(crate) struct SignerCondition {
    satisfied: bool,
}

impl Condition for SignerCondition {
    fn kind(&self) -> &str {
        SIGNER_KIND
    }

    fn is_satisfied(&self, _scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
        Ok(self.satisfied)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SignerFactory;

impl ConditionFactory for SignerFactory {
    fn kind(&self) -> &str {
        SIGNER_KIND
    }

    fn validate(&self, info: &ConditionInfo) -> Result<(), ConditionError> {
        let (pattern, _) = pattern_and_negation(info, SIGNER_KIND)?;
        ChainPattern::parse(pattern)?;
        Ok(())
    }

    fn create(
        &self,
        info: &ConditionInfo,
        unit: &UnitInfo,
    ) -> Result<Arc<dyn Condition>, ConditionError> {
        let (text, negated) = pattern_and_negation(info, SIGNER_KIND)?;
        let pattern = ChainPattern::parse(text)?;

        // Signers are fixed for the lifetime of the unit, so the answer is
        // computed once here.
        let mut matched = false;
        for chain in &unit.signers {
            match pattern.match_chain(chain) {
                Ok(result) if result.is_match() => {
                    matched = true;
                    break;
                }
                Ok(_) => {}
                Err(MatchError::Chain(e)) => {
                    debug!(unit = unit.id, error = %e, "ignoring malformed signer chain");
                }
                Err(MatchError::Pattern(e)) => return Err(e.into()),
            }
        }
        Ok(Arc::new(SignerCondition {
            satisfied: matched != negated,
        }))
    }
}

/// Satisfied when the unit origin matches a glob.
#[derive(Debug)]
pub(crate) struct LocationCondition {
    satisfied: bool,
}

impl Condition for LocationCondition {
    fn kind(&self) -> &str {
        LOCATION_KIND
    }

    fn is_satisfied(&self, _scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
        Ok(self.satisfied)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocationFactory;

impl ConditionFactory for LocationFactory {
    fn kind(&self) -> &str {
        LOCATION_KIND
    }

    fn validate(&self, info: &ConditionInfo) -> Result<(), ConditionError> {
        let (glob, _) = pattern_and_negation(info, LOCATION_KIND)?;
        compile_origin_glob(glob)?;
        Ok(())
    }

    fn create(
        &self,
        info: &ConditionInfo,
        unit: &UnitInfo,
    ) -> Result<Arc<dyn Condition>, ConditionError> {
        let (glob, negated) = pattern_and_negation(info, LOCATION_KIND)?;
        let matcher = compile_origin_glob(glob)?;
        Ok(Arc::new(LocationCondition {
            satisfied: matcher.is_match(&unit.origin) != negated,
        }))
    }
}

/// Origins are URLs, so `*` also crosses `/`. `\` escapes the next character.
fn compile_origin_glob(glob: &str) -> Result<GlobMatcher, ConditionError> {
    GlobBuilder::new(glob)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ConditionError::InvalidArguments {
            kind: LOCATION_KIND.to_string(),
            reason: e.to_string(),
        })
}
