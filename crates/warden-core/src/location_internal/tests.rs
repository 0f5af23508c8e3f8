use std::fs;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::location::*;
use crate::permission::PermissionInfo;

fn read_tmp() -> Vec<PermissionInfo> {
    vec![PermissionInfo::new("file", Some("/tmp/*"), Some("read"))]
}

fn record_files(dir: &TempDir) -> usize {
    fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "rec"))
        .count()
}

#[test]
fn test_declared_and_default_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
        store.set_declared("file:/a.jar", Some(read_tmp()));
        store.set_declared("file:/b.jar", Some(Vec::new()));
        store.set_default(Some(vec![PermissionInfo::all()]));
        store.set_declared("file:/b.jar", None);
    }

    let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
    assert_eq!(store.get_declared("file:/a.jar"), Some(read_tmp()));
    assert_eq!(store.get_declared("file:/b.jar"), None);
    assert_eq!(store.get_default(), Some(vec![PermissionInfo::all()]));
    assert_eq!(store.origins(), vec!["file:/a.jar"]);
}

#[test]
fn test_empty_declared_list_is_kept_distinct_from_absent() {
    let dir = TempDir::new().unwrap();
    {
        let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
        store.set_declared("file:/locked.jar", Some(Vec::new()));
    }
    let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
    assert_eq!(store.get_declared("file:/locked.jar"), Some(Vec::new()));
}

#[test]
fn test_origin_named_star_is_not_the_default() {
    let store = LocationPermissionStore::in_memory();
    store.set_declared("*", Some(read_tmp()));
    assert_eq!(store.get_default(), None);

    let dir = TempDir::new().unwrap();
    {
        let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
        store.set_declared("*", Some(read_tmp()));
    }
    let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
    assert_eq!(store.get_default(), None);
    assert_eq!(store.get_declared("*"), Some(read_tmp()));
}

fn tmp_read(i: usize) -> Vec<PermissionInfo> {
    vec![PermissionInfo::new("file", Some(&format!("/tmp/{i}")), Some("read"))]
}

fn highest_seq(dir: &TempDir) -> u64 {
    fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            name.strip_prefix("perm-")?.strip_suffix(".rec")?.parse().ok()
        })
        .max()
        .unwrap_or(0)
}

#[test]
fn test_log_compacts_past_threshold() {
    let dir = TempDir::new().unwrap();
    let store = LocationPermissionStore::open(dir.path(), 4).unwrap();
    for i in 0..5 {
        store.set_declared("file:/a.jar", Some(tmp_read(i)));
    }
    assert_eq!(record_files(&dir), 5);

    // Five superseded files behind the live one.
    store.set_declared("file:/a.jar", Some(tmp_read(5)));
    assert_eq!(record_files(&dir), 1);

    store.set_declared("file:/b.jar", Some(read_tmp()));
    assert_eq!(record_files(&dir), 2);

    drop(store);
    let reopened = LocationPermissionStore::open(dir.path(), 4).unwrap();
    assert_eq!(reopened.get_declared("file:/a.jar"), Some(tmp_read(5)));
    assert_eq!(reopened.get_declared("file:/b.jar"), Some(read_tmp()));
}

#[test]
fn test_many_live_keys_do_not_compact_every_write() {
    let dir = TempDir::new().unwrap();
    let store = LocationPermissionStore::open(dir.path(), 2).unwrap();
    for i in 0..5 {
        store.set_declared(&format!("file:/{i}.jar"), Some(tmp_read(i)));
    }
    assert_eq!(record_files(&dir), 5);
    assert_eq!(highest_seq(&dir), 5);

    // Each write below adds one file until three are superseded.
    store.set_declared("file:/1.jar", Some(read_tmp()));
    assert_eq!(record_files(&dir), 6);
    assert_eq!(highest_seq(&dir), 6);
    store.set_declared("file:/2.jar", Some(read_tmp()));
    assert_eq!(record_files(&dir), 7);
    assert_eq!(highest_seq(&dir), 7);

    store.set_declared("file:/0.jar", None);
    assert_eq!(record_files(&dir), 4);

    // Reopening a freshly compacted log leaves it alone.
    drop(store);
    let before = highest_seq(&dir);
    let reopened = LocationPermissionStore::open(dir.path(), 2).unwrap();
    assert_eq!(highest_seq(&dir), before);
    assert_eq!(reopened.origins().len(), 4);
    assert_eq!(reopened.get_declared("file:/0.jar"), None);
    assert_eq!(reopened.get_declared("file:/2.jar"), Some(read_tmp()));
}

#[test]
fn test_write_failure_keeps_memory_current() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("declared");
    let store = LocationPermissionStore::open(&log_dir, 64).unwrap();
    store.set_declared("file:/a.jar", Some(read_tmp()));

    fs::remove_dir_all(&log_dir).unwrap();
    fs::write(&log_dir, "not a directory").unwrap();

    store.set_declared("file:/a.jar", Some(Vec::new()));
    store.set_default(Some(vec![PermissionInfo::all()]));
    assert_eq!(store.get_declared("file:/a.jar"), Some(Vec::new()));
    assert_eq!(store.get_default(), Some(vec![PermissionInfo::all()]));

    assert!(LocationPermissionStore::open(&log_dir, 64).is_err());
}

#[test]
fn test_corrupt_record_is_skipped() {
    let dir = TempDir::new().unwrap();
    {
        let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
        store.set_declared("file:/a.jar", Some(read_tmp()));
    }
    fs::write(
        dir.path().join("perm-0000000002.rec"),
        "file:/a.jar\n\n(broken\n",
    )
    .unwrap();

    let store = LocationPermissionStore::open(dir.path(), 64).unwrap();
    assert_eq!(store.get_declared("file:/a.jar"), Some(read_tmp()));

    // New records continue after the corrupt one.
    store.set_declared("file:/a.jar", None);
    assert!(dir.path().join("perm-0000000003.rec").exists());
}

#[derive(Default)]
struct Changes(Mutex<Vec<Option<String>>>);

impl DeclaredListener for Changes {
    fn declared_changed(&self, change: DeclaredChange<'_>) {
        let entry = match change {
            DeclaredChange::Origin(origin) => Some(origin.to_string()),
            DeclaredChange::Default => None,
        };
        self.0.lock().unwrap().push(entry);
    }
}

#[test]
fn test_listeners_see_origin_and_default_changes() {
    let store = LocationPermissionStore::in_memory();
    let changes = Arc::new(Changes::default());
    let listener: Arc<dyn DeclaredListener> = changes.clone();
    let id = store.subscribe(Arc::downgrade(&listener));

    store.set_declared("file:/a.jar", Some(read_tmp()));
    store.set_default(None);
    assert_eq!(
        *changes.0.lock().unwrap(),
        vec![Some("file:/a.jar".to_string()), None]
    );

    assert!(store.unsubscribe(id));
    store.set_default(None);
    assert_eq!(changes.0.lock().unwrap().len(), 2);
}
