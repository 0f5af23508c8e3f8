//! Concurrency tests for the shared rule table.
//!
//! Many threads hit one `RuleTableService`; names, generations and
//! transaction outcomes must stay consistent.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use warden_core::{PermissionInfo, RuleSpec, RuleTableService, TableError};

fn read(name: &str) -> PermissionInfo {
    PermissionInfo::new("file", Some(name), Some("read"))
}

/// Test: M anonymous puts from several threads → M distinct names.
#[test]
fn test_concurrent_anonymous_puts_get_distinct_names() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let table = Arc::new(RuleTableService::in_memory());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = table.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|i| {
                        table
                            .put(None, vec![], vec![read(&format!("/t{t}/{i}"))])
                            .unwrap()
                            .name()
                            .to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut names = HashSet::new();
    for handle in handles {
        for name in handle.join().unwrap() {
            assert!(names.insert(name.clone()), "duplicate name {name}");
        }
    }
    assert_eq!(names.len(), THREADS * PER_THREAD);
    assert_eq!(table.size(), THREADS * PER_THREAD);
    assert_eq!(table.generation(), (THREADS * PER_THREAD) as u64);
}

/// Test: racing commits from one base generation → exactly one wins.
#[test]
fn test_racing_commits_exactly_one_wins() {
    const THREADS: usize = 6;

    let table = Arc::new(RuleTableService::in_memory());
    table.put(Some("base"), vec![], vec![read("/base")]).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = table.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut update = table.begin_update();
                update.push_back(RuleSpec::allow().named(format!("from-{t}")).with_permission(read("/x")));
                barrier.wait();
                table.commit(update)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, TableError::ConcurrentUpdate { expected: 1, actual: 2 })));
    assert_eq!(table.generation(), 2);
    assert_eq!(table.size(), 2);
}

/// Test: conflicting writers that retry on conflict all land eventually.
#[test]
fn test_retrying_writers_all_land() {
    const THREADS: usize = 4;
    let table = Arc::new(RuleTableService::in_memory());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = table.clone();
            thread::spawn(move || loop {
                let mut update = table.begin_update();
                update.push_front(RuleSpec::deny().named(format!("writer-{t}")).with_permission(read("/y")));
                match table.commit(update) {
                    Ok(()) => break,
                    Err(e) if e.is_conflict() => continue,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let names: HashSet<String> = table.get_all().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names.len(), THREADS);
    assert_eq!(table.generation(), THREADS as u64);
}
