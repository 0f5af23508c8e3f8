//! Stack-wide permission checks with postponed conditions.
//!
//! A [`SecurityContext`] is the access-control stack of one thread: the
//! unit views on the current call chain, closest to the check site
//! first. [`SecurityContext::check`] runs the immediate pass for every
//! frame, fails fast on the first DENY, then resolves the frames that
//! left postponed rules behind. Every frame must decide ALLOW.
//!
//! A context is `!Sync` and belongs to one thread. Nested checks issued by a
//! condition go through [`ConditionScope::check`] on the same context
//! and reuse its pooled buffers.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::condition::ConditionScope;
use crate::permission::Permission;
use crate::rule::{Access, PendingCondition, RuleRecord};
use crate::view::{FrameVerdict, UnitPermissionView};

/// Buffers kept for reuse by later and nested checks.
const POOL_LIMIT: usize = 16;

/// A rule of one frame whose postponed conditions are still open.
#[derive(Debug)]
pub(crate) struct PendingRule {
    pub(crate) record: Arc<RuleRecord>,
    pub(crate) conditions: Vec<PendingCondition>,
}

/// Per-kind state shared by every condition of one check.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    by_kind: RefCell<HashMap<String, BTreeMap<String, String>>>,
}

impl SharedState {
    pub(crate) fn with<R>(&self, kind: &str, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> R {
        let mut by_kind = self.by_kind.borrow_mut();
        f(by_kind.entry(kind.to_string()).or_default())
    }
}

pub struct SecurityContext {
    frames: Vec<Arc<UnitPermissionView>>,
    pool: RefCell<Vec<Vec<PendingRule>>>,
    depth: Cell<usize>,
}

impl SecurityContext {
    /// `frames` closest to the check site first.
    pub fn new(frames: Vec<Arc<UnitPermissionView>>) -> Self {
        Self {
            frames,
            pool: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        }
    }

    pub fn frames(&self) -> &[Arc<UnitPermissionView>] {
        &self.frames
    }

    /// Number of checks currently running on this context.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn check(&self, permission: &Permission) -> bool {
        let _depth = DepthGuard::enter(&self.depth);
        let allowed = coordinate(self, permission);
        trace!(permission = %permission, depth = self.depth(), allowed, "permission check");
        allowed
    }

    fn take_buffer(&self) -> Vec<PendingRule> {
        self.pool.borrow_mut().pop().unwrap_or_default()
    }

    fn return_buffer(&self, mut buffer: Vec<PendingRule>) {
        buffer.clear();
        let mut pool = self.pool.borrow_mut();
        if pool.len() < POOL_LIMIT {
            pool.push(buffer);
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled_buffers(&self) -> usize {
        self.pool.borrow().len()
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("frames", &self.frames.len())
            .field("depth", &self.depth.get())
            .finish()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

struct PostponedFrame {
    index: usize,
    rules: Vec<PendingRule>,
    fallback: Access,
}

fn coordinate(context: &SecurityContext, permission: &Permission) -> bool {
    let shared = SharedState::default();
    let mut postponed = Vec::new();
    let mut allowed = true;

    for (index, view) in context.frames.iter().enumerate() {
        let scope = ConditionScope::new(context, index, &shared);
        let mut rules = context.take_buffer();
        match view.evaluate_frame(permission, &scope, &mut rules) {
            FrameVerdict::Decided(Access::Allow) => context.return_buffer(rules),
            FrameVerdict::Decided(Access::Deny) => {
                debug!(frame = index, unit = view.unit_id(), permission = %permission, "denied by frame");
                context.return_buffer(rules);
                allowed = false;
                break;
            }
            FrameVerdict::Postponed(fallback) => postponed.push(PostponedFrame {
                index,
                rules,
                fallback,
            }),
        }
    }

    for mut frame in postponed {
        if allowed && resolve_frame(context, &mut frame, &shared) == Access::Deny {
            debug!(frame = frame.index, permission = %permission, "denied after postponed evaluation");
            allowed = false;
        }
        context.return_buffer(frame.rules);
    }
    allowed
}

fn resolve_frame(context: &SecurityContext, frame: &mut PostponedFrame, shared: &SharedState) -> Access {
    // Trailing rules that agree with the fallback cannot change the result.
    while frame
        .rules
        .last()
        .is_some_and(|rule| rule.record.access() == frame.fallback)
    {
        frame.rules.pop();
    }
    if frame.rules.is_empty() {
        return frame.fallback;
    }

    let scope = ConditionScope::new(context, frame.index, shared);
    frame
        .rules
        .iter()
        .find(|rule| rule.record.evaluate_postponed(&rule.conditions, &scope))
        .map_or(frame.fallback, |rule| rule.record.access())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionFactory, ConditionInfo, ConditionRegistry};
    use crate::errors::ConditionError;
    use crate::permission::PermissionInfo;
    use crate::rule::RuleSpec;
    use crate::table::{MemoryTableStore, RuleTableService};
    use crate::view::{PolicyServices, UnitInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// `[stack "<answer>" "<tag>"]`: postponed, records its tag when called.
    /// `error` fails and is immutable; `outermost` holds when the outermost
    /// frame is under `file:/trusted/`.
    struct StackFactory {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[derive(Debug, Clone, Copy)]
    enum Answer {
        Fixed(bool),
        Error,
        Outermost,
    }

    #[derive(Debug)]
    struct StackCondition {
        answer: Answer,
        tag: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Condition for StackCondition {
        fn kind(&self) -> &str {
            "stack"
        }
        fn is_postponed(&self) -> bool {
            true
        }
        fn is_mutable(&self) -> bool {
            !matches!(self.answer, Answer::Error)
        }
        fn is_satisfied(&self, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
            self.calls.lock().unwrap().push(self.tag.clone());
            scope.with_shared("stack", |state| {
                *state.entry("seen".into()).or_default() += "x";
            });
            match self.answer {
                Answer::Fixed(answer) => Ok(answer),
                Answer::Error => Err(ConditionError::Failed {
                    kind: "stack".into(),
                    message: "backend unavailable".into(),
                }),
                Answer::Outermost => Ok(scope
                    .frame_count()
                    .checked_sub(1)
                    .and_then(|last| scope.unit(last))
                    .is_some_and(|unit| unit.origin.starts_with("file:/trusted/"))),
            }
        }
    }

    impl ConditionFactory for StackFactory {
        fn kind(&self) -> &str {
            "stack"
        }
        fn validate(&self, _info: &ConditionInfo) -> Result<(), ConditionError> {
            Ok(())
        }
        fn create(
            &self,
            info: &ConditionInfo,
            _unit: &UnitInfo,
        ) -> Result<Arc<dyn Condition>, ConditionError> {
            let answer = match info.args[0].as_str() {
                "error" => Answer::Error,
                "outermost" => Answer::Outermost,
                other => Answer::Fixed(other == "true"),
            };
            Ok(Arc::new(StackCondition {
                answer,
                tag: info.args[1].clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    fn services() -> (PolicyServices, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ConditionRegistry::with_builtins());
        registry.register(Arc::new(StackFactory {
            calls: calls.clone(),
        }));
        let table = RuleTableService::open(Box::new(MemoryTableStore::new()), registry);
        let services = PolicyServices::new(
            Arc::new(table),
            Arc::new(crate::location::LocationPermissionStore::in_memory()),
        );
        (services, calls)
    }

    fn stack(answer: bool, tag: &str) -> ConditionInfo {
        ConditionInfo::new("stack", [if answer { "true" } else { "false" }, tag])
    }

    fn stack_answer(answer: &str, tag: &str) -> ConditionInfo {
        ConditionInfo::new("stack", [answer, tag])
    }

    fn read_tmp() -> Permission {
        Permission::new("file", "/tmp/x", "read")
    }

    fn tmp() -> PermissionInfo {
        PermissionInfo::new("file", Some("/tmp/*"), Some("read"))
    }

    /// Rules in table order, first element first.
    fn install(services: &PolicyServices, rules: Vec<RuleSpec>) {
        let mut update = services.table.begin_update();
        update.replace_all(rules);
        services.table.commit(update).unwrap();
    }

    #[test]
    fn test_frame_falls_back_to_first_postponed_match() {
        let (services, calls) = services();
        install(
            &services,
            vec![
                RuleSpec::deny().with_condition(stack(false, "p1")).with_permission(tmp()),
                RuleSpec::allow().with_condition(stack(true, "p2")).with_permission(tmp()),
                RuleSpec::deny().with_condition(stack(true, "p3")).with_permission(tmp()),
            ],
        );
        let view = UnitPermissionView::new(UnitInfo::new(1, "file:/a.jar"), &services);
        assert!(view.implies(&read_tmp()));
        // p3 agrees with the DENY fallback and is pruned unevaluated.
        assert_eq!(*calls.lock().unwrap(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_pruned_to_empty_takes_immediate_verdict() {
        let (services, calls) = services();
        install(
            &services,
            vec![
                RuleSpec::allow().with_condition(stack(true, "p1")).with_permission(tmp()),
                RuleSpec::allow().with_permission(tmp()),
            ],
        );
        let view = UnitPermissionView::new(UnitInfo::new(1, "file:/a.jar"), &services);
        assert!(view.implies(&read_tmp()));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_deny_wins_across_frames() {
        let (services, _) = services();
        install(
            &services,
            vec![
                RuleSpec::allow()
                    .with_condition(ConditionInfo::new("location", ["file:/trusted/*"]))
                    .with_permission(tmp()),
            ],
        );
        let trusted = UnitPermissionView::new(UnitInfo::new(1, "file:/trusted/a.jar"), &services);
        let untrusted = UnitPermissionView::new(UnitInfo::new(2, "file:/other/b.jar"), &services);

        assert!(SecurityContext::new(vec![trusted.clone()]).check(&read_tmp()));
        assert!(!SecurityContext::new(vec![trusted.clone(), untrusted.clone()]).check(&read_tmp()));
        assert!(!SecurityContext::new(vec![untrusted, trusted]).check(&read_tmp()));
    }

    #[test]
    fn test_early_deny_skips_postponed_evaluation() {
        let (services, calls) = services();
        install(
            &services,
            vec![
                RuleSpec::allow()
                    .with_condition(ConditionInfo::new("location", ["file:/pending/*"]))
                    .with_condition(stack(true, "p"))
                    .with_permission(tmp()),
            ],
        );
        let pending = UnitPermissionView::new(UnitInfo::new(1, "file:/pending/a.jar"), &services);
        let denied = UnitPermissionView::new(UnitInfo::new(2, "file:/other/b.jar"), &services);
        assert!(!SecurityContext::new(vec![pending, denied]).check(&read_tmp()));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_postponed_condition_takes_fallback_uncached() {
        let (services, calls) = services();
        install(
            &services,
            vec![
                RuleSpec::deny().with_condition(stack_answer("error", "e")).with_permission(tmp()),
                RuleSpec::allow().with_permission(tmp()),
            ],
        );
        let view = UnitPermissionView::new(UnitInfo::new(1, "file:/a.jar"), &services);
        let context = SecurityContext::new(vec![view]);
        assert!(context.check(&read_tmp()));
        assert!(context.check(&read_tmp()));
        assert_eq!(*calls.lock().unwrap(), vec!["e", "e"]);
    }

    #[test]
    fn test_failing_postponed_condition_without_fallback_denies() {
        let (services, calls) = services();
        install(
            &services,
            vec![
                RuleSpec::allow().with_condition(stack_answer("error", "e")).with_permission(tmp()),
                RuleSpec::deny().with_permission(tmp()),
            ],
        );
        let view = UnitPermissionView::new(UnitInfo::new(1, "file:/a.jar"), &services);
        assert!(!SecurityContext::new(vec![view]).check(&read_tmp()));
        assert_eq!(*calls.lock().unwrap(), vec!["e"]);
    }

    #[test]
    fn test_postponed_condition_walks_frames() {
        let (services, _) = services();
        install(
            &services,
            vec![
                RuleSpec::allow().with_condition(stack_answer("outermost", "o")).with_permission(tmp()),
                RuleSpec::deny().with_permission(tmp()),
            ],
        );
        let inner = UnitPermissionView::new(UnitInfo::new(1, "file:/plugin/a.jar"), &services);
        let trusted = UnitPermissionView::new(UnitInfo::new(2, "file:/trusted/host.jar"), &services);

        assert!(!SecurityContext::new(vec![inner.clone()]).check(&read_tmp()));
        assert!(SecurityContext::new(vec![inner.clone(), trusted.clone()]).check(&read_tmp()));
        assert!(!SecurityContext::new(vec![trusted, inner]).check(&read_tmp()));
    }

    #[derive(Debug)]
    struct Nested {
        inner: Permission,
        depth_seen: Arc<AtomicUsize>,
    }

    impl Condition for Nested {
        fn kind(&self) -> &str {
            "nested"
        }
        fn is_mutable(&self) -> bool {
            true
        }
        fn is_satisfied(&self, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
            self.depth_seen.store(scope.depth(), Ordering::SeqCst);
            if scope.depth() > 1 {
                return Ok(false);
            }
            Ok(scope.check(&self.inner))
        }
    }

    struct NestedFactory(Arc<AtomicUsize>);

    impl ConditionFactory for NestedFactory {
        fn kind(&self) -> &str {
            "nested"
        }
        fn validate(&self, _info: &ConditionInfo) -> Result<(), ConditionError> {
            Ok(())
        }
        fn create(
            &self,
            info: &ConditionInfo,
            _unit: &UnitInfo,
        ) -> Result<Arc<dyn Condition>, ConditionError> {
            Ok(Arc::new(Nested {
                inner: Permission::new("file", &info.args[0], "read"),
                depth_seen: self.0.clone(),
            }))
        }
    }

    #[test]
    fn test_nested_check_reuses_context() {
        let (services, _) = services();
        let depth = Arc::new(AtomicUsize::new(0));
        services
            .conditions
            .register(Arc::new(NestedFactory(depth.clone())));
        install(
            &services,
            vec![
                RuleSpec::allow()
                    .with_condition(ConditionInfo::new("nested", ["/gate/open"]))
                    .with_permission(tmp()),
                RuleSpec::allow().with_permission(PermissionInfo::new(
                    "file",
                    Some("/gate/*"),
                    Some("read"),
                )),
            ],
        );
        let view = UnitPermissionView::new(UnitInfo::new(1, "file:/a.jar"), &services);
        let context = SecurityContext::new(vec![view]);
        assert!(context.check(&read_tmp()));
        assert_eq!(depth.load(Ordering::SeqCst), 2);
        assert_eq!(context.depth(), 0);
        assert!(context.pooled_buffers() >= 1);
    }
}
