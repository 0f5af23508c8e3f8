use std::sync::Arc;

use crate::table::{RuleEntry, TableChange};

/// Turn `current` into `target`, returning the new list and the changes in
/// application order. Entries are matched by identity; an adjacent
/// remove/insert pair becomes an in-place replace.
pub(crate) fn apply(
    current: &[Arc<RuleEntry>],
    target: &[Arc<RuleEntry>],
) -> (Vec<Arc<RuleEntry>>, Vec<TableChange>) {
    let kept = common_subsequence(current, target);
    let mut list = current.to_vec();
    let mut changes = Vec::new();

    let (mut i, mut j, mut pos) = (0, 0, 0);
    let sentinel = std::iter::once((current.len(), target.len()));
    for (next_i, next_j) in kept.into_iter().chain(sentinel) {
        let removed = next_i - i;
        let inserted = next_j - j;
        let replaced = removed.min(inserted);

        for entry in &target[j..j + replaced] {
            let old = std::mem::replace(&mut list[pos], entry.clone());
            changes.push(TableChange::Replaced {
                index: pos,
                old: old.id(),
                new: entry.id(),
            });
            pos += 1;
        }
        for _ in replaced..removed {
            let old = list.remove(pos);
            changes.push(TableChange::Removed {
                index: pos,
                entry: old.id(),
            });
        }
        for entry in &target[j + replaced..next_j] {
            list.insert(pos, entry.clone());
            changes.push(TableChange::Inserted {
                index: pos,
                entry: entry.id(),
            });
            pos += 1;
        }

        // Step over the kept entry.
        pos += 1;
        i = next_i + 1;
        j = next_j + 1;
    }

    debug_assert!(list.iter().map(|e| e.id()).eq(target.iter().map(|e| e.id())));
    (list, changes)
}

/// Longest common subsequence by entry id, as index pairs.
fn common_subsequence(a: &[Arc<RuleEntry>], b: &[Arc<RuleEntry>]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i].id() == b[j].id() {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[0][0]);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i].id() == b[j].id() {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
