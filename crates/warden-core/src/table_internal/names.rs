use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::errors::{TableError, TableResult};
use crate::table::{RuleEntry, UpdateRow};

/// Name for an anonymous put: `rule-<generation>`, suffixed until free.
pub(crate) fn synthesize(generation: u64, taken: impl Fn(&str) -> bool) -> String {
    let base = format!("rule-{generation}");
    if !taken(&base) {
        return base;
    }
    (1u64..)
        .map(|suffix| format!("{base}-{suffix}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

/// A prefix no name in either list starts with; anonymous rows of a
/// transaction are named `<prefix>.<n>`.
pub(crate) fn transaction_base(generation: u64, names: &HashSet<&str>) -> String {
    let mut salt = 0u64;
    loop {
        let base = if salt == 0 {
            format!("rule-{generation}")
        } else {
            format!("rule-{generation}x{salt}")
        };
        let prefix = format!("{base}.");
        if !names.iter().any(|name| name.starts_with(&prefix)) {
            return base;
        }
        salt += 1;
    }
}

/// Rebuild entries from a stored snapshot. Later duplicates of a name are
/// dropped.
pub(crate) fn entries_from_stored(rules: Vec<crate::rule::RuleSpec>) -> Vec<Arc<RuleEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(rules.len());
    for (position, mut spec) in rules.into_iter().enumerate() {
        let name = spec
            .name
            .take()
            .unwrap_or_else(|| synthesize(0, |candidate| seen.contains(candidate)));
        if !seen.insert(name.clone()) {
            warn!(name = %name, position, "dropping duplicate rule name from snapshot");
            continue;
        }
        entries.push(Arc::new(RuleEntry::new(name, spec)));
    }
    entries
}

/// Turn transaction rows into the target entry list.
pub(crate) fn materialize(
    current: &[Arc<RuleEntry>],
    rows: Vec<UpdateRow>,
    generation: u64,
) -> TableResult<Vec<Arc<RuleEntry>>> {
    let base = {
        let mut names: HashSet<&str> = HashSet::new();
        for name in rows.iter().filter_map(UpdateRow::name) {
            if !names.insert(name) {
                return Err(TableError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        names.extend(current.iter().map(|e| e.name()));
        transaction_base(generation, &names)
    };

    let mut anonymous = 0usize;
    let mut target = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = match row {
            UpdateRow::Existing(entry) => entry,
            UpdateRow::New(mut spec) => {
                let name = match spec.name.take() {
                    Some(name) => name,
                    None => {
                        anonymous += 1;
                        format!("{base}.{anonymous}")
                    }
                };
                Arc::new(RuleEntry::new(name, spec))
            }
        };
        target.push(entry);
    }
    Ok(target)
}
