//! Rule specs and their per-unit evaluation records.
//!
//! A [`RuleSpec`] is the administrative form of a rule:
//!
//! ```text
//! ALLOW { [signer "*, o=ACME;-"] (file "/tmp/*" "read") } "acme-tmp"
//! ```
//!
//! A [`RuleRecord`] binds a table entry to one unit and owns the condition
//! instances created for that unit.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::codec::{quote, Scanner};
use crate::condition::{Condition, ConditionInfo, ConditionScope};
use crate::errors::SpecError;
use crate::permission::{Permission, PermissionInfo, PermissionSet};
use crate::table::RuleEntry;

/// Decision carried by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    Allow,
    Deny,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("allow") {
            Ok(Self::Allow)
        } else if s.eq_ignore_ascii_case("deny") {
            Ok(Self::Deny)
        } else {
            Err(format!("unknown access decision: {s}"))
        }
    }
}

/// Administrative form of a rule. `name` is `None` until the table assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSpec {
    pub name: Option<String>,
    pub access: Access,
    pub conditions: Vec<ConditionInfo>,
    pub permissions: Vec<PermissionInfo>,
}

impl RuleSpec {
    pub fn new(access: Access) -> Self {
        Self {
            access,
            ..Self::default()
        }
    }

    pub fn allow() -> Self {
        Self::new(Access::Allow)
    }

    pub fn deny() -> Self {
        Self::new(Access::Deny)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_condition(mut self, condition: ConditionInfo) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_permission(mut self, permission: PermissionInfo) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Parse `ACCESS { [cond]* (perm)* } ["name"]`.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut scanner = Scanner::new(text);
        let access_word = scanner.word()?;
        let access = access_word
            .parse::<Access>()
            .map_err(|reason| scanner.error(reason))?;
        scanner.expect('{')?;

        let mut conditions = Vec::new();
        while scanner.peek() == Some('[') {
            conditions.push(ConditionInfo::read(&mut scanner)?);
        }
        let mut permissions = Vec::new();
        while scanner.peek() == Some('(') {
            permissions.push(PermissionInfo::read(&mut scanner)?);
        }
        if scanner.peek() == Some('[') {
            return Err(scanner.error("conditions must precede permissions"));
        }
        scanner.expect('}')?;

        let name = if scanner.peek() == Some('"') {
            Some(scanner.quoted()?)
        } else {
            None
        };
        scanner.finish()?;

        Ok(Self {
            name,
            access,
            conditions,
            permissions,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{} {{", self.access);
        for condition in &self.conditions {
            out.push(' ');
            out.push_str(&condition.encode());
        }
        for permission in &self.permissions {
            out.push(' ');
            out.push_str(&permission.encode());
        }
        out.push_str(" }");
        if let Some(name) = &self.name {
            out.push(' ');
            out.push_str(&quote(name));
        }
        out
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for RuleSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A postponed condition left for the coordinator, with its slot in the record.
#[derive(Debug, Clone)]
pub struct PendingCondition {
    slot: usize,
    condition: Arc<dyn Condition>,
}

impl PendingCondition {
    pub fn condition(&self) -> &Arc<dyn Condition> {
        &self.condition
    }
}

/// Outcome of the immediate pass over one record.
#[derive(Debug, Clone)]
pub enum RuleEvaluation {
    NotImplied,
    Implied,
    /// Implied provided every listed postponed condition holds.
    Pending(Vec<PendingCondition>),
}

#[derive(Debug)]
enum ConditionState {
    /// `None` slots were immutable and satisfied.
    Active(Vec<Option<Arc<dyn Condition>>>),
    /// An immutable condition was unsatisfied, or instantiation failed.
    Failed,
}

/// A table entry bound to one unit.
#[derive(Debug)]
pub struct RuleRecord {
    entry: Arc<RuleEntry>,
    permissions: PermissionSet,
    state: RwLock<ConditionState>,
}

impl RuleRecord {
    pub fn new(entry: Arc<RuleEntry>, conditions: Vec<Arc<dyn Condition>>) -> Self {
        let permissions = PermissionSet::from_infos(entry.permissions());
        Self {
            entry,
            permissions,
            state: RwLock::new(ConditionState::Active(
                conditions.into_iter().map(Some).collect(),
            )),
        }
    }

    /// A record that never implies anything.
    pub fn failed(entry: Arc<RuleEntry>) -> Self {
        let permissions = PermissionSet::from_infos(entry.permissions());
        Self {
            entry,
            permissions,
            state: RwLock::new(ConditionState::Failed),
        }
    }

    pub fn entry(&self) -> &Arc<RuleEntry> {
        &self.entry
    }

    pub fn access(&self) -> Access {
        self.entry.access()
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(PoisonError::into_inner),
            ConditionState::Failed
        )
    }

    /// Conditions still evaluated on each check.
    pub fn remaining_conditions(&self) -> usize {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            ConditionState::Active(slots) => slots.iter().flatten().count(),
            ConditionState::Failed => 0,
        }
    }

    /// Immediate pass. Postponed conditions are collected instead of
    /// evaluated unless `include_postponed` is set.
    pub fn evaluate(
        &self,
        permission: &Permission,
        include_postponed: bool,
        scope: &ConditionScope<'_>,
    ) -> RuleEvaluation {
        let live: Vec<(usize, Arc<dyn Condition>)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                ConditionState::Failed => return RuleEvaluation::NotImplied,
                ConditionState::Active(slots) => slots
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, c)| c.clone().map(|c| (slot, c)))
                    .collect(),
            }
        };

        let mut pending = Vec::new();
        let mut resolved = Vec::new();
        for (slot, condition) in live {
            if condition.is_postponed() && !include_postponed {
                pending.push(PendingCondition { slot, condition });
                continue;
            }
            match self.check_condition(slot, &condition, scope, &mut resolved) {
                Some(true) => {}
                Some(false) | None => {
                    self.settle(&resolved);
                    return RuleEvaluation::NotImplied;
                }
            }
        }
        self.settle(&resolved);

        if !self.permissions.implies(permission) {
            return RuleEvaluation::NotImplied;
        }
        if pending.is_empty() {
            RuleEvaluation::Implied
        } else {
            RuleEvaluation::Pending(pending)
        }
    }

    /// Second pass over conditions left by [`evaluate`](Self::evaluate).
    pub fn evaluate_postponed(
        &self,
        pending: &[PendingCondition],
        scope: &ConditionScope<'_>,
    ) -> bool {
        let mut resolved = Vec::new();
        for p in pending {
            if self.check_condition(p.slot, &p.condition, scope, &mut resolved) != Some(true) {
                self.settle(&resolved);
                return false;
            }
        }
        self.settle(&resolved);
        true
    }

    /// `None` when the condition raised an error; it then counts as
    /// unsatisfied without being cached.
    fn check_condition(
        &self,
        slot: usize,
        condition: &Arc<dyn Condition>,
        scope: &ConditionScope<'_>,
        resolved: &mut Vec<usize>,
    ) -> Option<bool> {
        match condition.is_satisfied(scope) {
            Ok(true) => {
                if !condition.is_mutable() {
                    resolved.push(slot);
                }
                Some(true)
            }
            Ok(false) => {
                if !condition.is_mutable() {
                    debug!(rule = self.entry.name(), kind = condition.kind(), "immutable condition unsatisfied, rule disabled");
                    self.fail();
                }
                Some(false)
            }
            Err(e) => {
                warn!(rule = self.entry.name(), kind = condition.kind(), error = %e, "condition evaluation failed, treating as unsatisfied");
                None
            }
        }
    }

    /// Drop satisfied immutable slots. Never revives a failed record.
    fn settle(&self, resolved: &[usize]) {
        if resolved.is_empty() {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let ConditionState::Active(slots) = &mut *state {
            for &slot in resolved {
                if let Some(s) = slots.get_mut(slot) {
                    *s = None;
                }
            }
        }
    }

    fn fail(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = ConditionState::Failed;
    }
}
