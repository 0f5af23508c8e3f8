//! Conditions attached to rule table entries.
//!
//! A condition is created once per (entry, unit) pair by a
//! [`ConditionFactory`] looked up by kind in the [`ConditionRegistry`].
//! Immutable conditions have their first answer cached by the owning
//! [`RuleRecord`](crate::rule::RuleRecord); postponed conditions are only
//! evaluated once every frame of a check has answered.
//!
//! Built-in kinds:
//!
//! | Kind       | Arguments              | Satisfied when                              |
//! |------------|------------------------|---------------------------------------------|
//! | `signer`   | `"pattern" ["!"]`      | any signer chain of the unit matches        |
//! | `location` | `"glob" ["!"]`         | the unit origin matches the glob            |

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::codec::{quote, Scanner};
use crate::errors::{ConditionError, SpecError};
use crate::permission::Permission;
use crate::postpone::{SecurityContext, SharedState};
use crate::view::UnitInfo;

#[path = "condition_internal/mod.rs"]
mod condition_internal;

pub use condition_internal::builtin::{LocationFactory, SignerFactory};

/// Kind of the built-in signer-chain condition.
pub const SIGNER_KIND: &str = "signer";

/// Kind of the built-in origin-glob condition.
pub const LOCATION_KIND: &str = "location";

/// A single predicate over the unit and the running check.
pub trait Condition: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    /// Evaluated only after every frame has answered.
    fn is_postponed(&self) -> bool {
        false
    }

    /// Mutable conditions are re-evaluated on every check.
    fn is_mutable(&self) -> bool {
        false
    }

    fn is_satisfied(&self, scope: &ConditionScope<'_>) -> Result<bool, ConditionError>;
}

/// Textual condition spec: `[kind "arg" ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConditionInfo {
    pub kind: String,
    pub args: Vec<String>,
}

impl ConditionInfo {
    pub fn new<I, S>(kind: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut scanner = Scanner::new(text);
        let info = Self::read(&mut scanner)?;
        scanner.finish()?;
        Ok(info)
    }

    pub(crate) fn read(scanner: &mut Scanner<'_>) -> Result<Self, SpecError> {
        scanner.expect('[')?;
        let kind = scanner.word()?.to_string();
        let mut args = Vec::new();
        while scanner.peek() == Some('"') {
            args.push(scanner.quoted()?);
        }
        scanner.expect(']')?;
        Ok(Self { kind, args })
    }

    pub fn encode(&self) -> String {
        let mut out = format!("[{}", self.kind);
        for arg in &self.args {
            out.push(' ');
            out.push_str(&quote(arg));
        }
        out.push(']');
        out
    }
}

impl fmt::Display for ConditionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for ConditionInfo {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Creates conditions of one kind.
pub trait ConditionFactory: Send + Sync {
    fn kind(&self) -> &str;

    /// Reject bad arguments at administration time.
    fn validate(&self, info: &ConditionInfo) -> Result<(), ConditionError>;

    fn create(
        &self,
        info: &ConditionInfo,
        unit: &UnitInfo,
    ) -> Result<Arc<dyn Condition>, ConditionError>;
}

/// Factories by kind.
pub struct ConditionRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ConditionFactory>>>,
}

impl ConditionRegistry {
    /// A registry with no kinds at all.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(SignerFactory));
        registry.register(Arc::new(LocationFactory));
        registry
    }

    /// Register a factory, replacing any previous factory for its kind.
    pub fn register(&self, factory: Arc<dyn ConditionFactory>) {
        let kind = factory.kind().to_string();
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, factory);
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    fn factory(&self, kind: &str) -> Result<Arc<dyn ConditionFactory>, ConditionError> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| ConditionError::Unknown {
                kind: kind.to_string(),
            })
    }

    pub fn validate(&self, info: &ConditionInfo) -> Result<(), ConditionError> {
        self.factory(&info.kind)?.validate(info)
    }

    pub fn create(
        &self,
        info: &ConditionInfo,
        unit: &UnitInfo,
    ) -> Result<Arc<dyn Condition>, ConditionError> {
        self.factory(&info.kind)?.create(info, unit)
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// What a condition sees while it is evaluated: the running check, the
/// frame it belongs to and per-kind state shared by all frames of that
/// check.
pub struct ConditionScope<'a> {
    context: &'a SecurityContext,
    frame: usize,
    shared: &'a SharedState,
}

impl<'a> ConditionScope<'a> {
    pub(crate) fn new(context: &'a SecurityContext, frame: usize, shared: &'a SharedState) -> Self {
        Self {
            context,
            frame,
            shared,
        }
    }

    /// Index of the frame being evaluated, innermost first.
    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn frame_count(&self) -> usize {
        self.context.frames().len()
    }

    /// Unit behind frame `index`.
    pub fn unit(&self, index: usize) -> Option<UnitInfo> {
        self.context.frames().get(index).map(|view| view.unit())
    }

    /// Nesting depth of the running check; 1 for a top-level check.
    pub fn depth(&self) -> usize {
        self.context.depth()
    }

    /// Run `f` over the state shared by every condition of `kind` in this
    /// check. `f` must not call back into `with_shared`.
    pub fn with_shared<R>(&self, kind: &str, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> R {
        self.shared.with(kind, f)
    }

    /// Run a nested check against the same frames.
    pub fn check(&self, permission: &Permission) -> bool {
        self.context.check(permission)
    }
}
