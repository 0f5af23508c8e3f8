//! Filesystem helpers shared by the rule-table and declared-permission logs.
//!
//! Both logs are directories of monotonically numbered files
//! (`<prefix>-NNNNNNNNNN.<ext>`). Files are written to a temp path and
//! renamed into place, so a reader never sees a half-written file under
//! its final name.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::StorageError;

pub(crate) fn numbered_name(prefix: &str, seq: u64, ext: &str) -> String {
    format!("{prefix}-{seq:010}.{ext}")
}

/// Numbered files in `dir`, oldest first. A missing directory is empty.
pub(crate) fn numbered_files(
    dir: &Path,
    prefix: &str,
    ext: &str,
) -> Result<Vec<(u64, PathBuf)>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::new(
                dir,
                format!("failed to read directory: {e}"),
            ))
        }
    };

    let head = format!("{prefix}-");
    let tail = format!(".{ext}");
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| StorageError::new(dir, format!("failed to read directory entry: {e}")))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let seq = name
            .strip_prefix(&head)
            .and_then(|rest| rest.strip_suffix(&tail))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(seq) = seq {
            files.push((seq, entry.path()));
        }
    }
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::new(parent, format!("failed to create directory: {e}")))?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)
        .map_err(|e| StorageError::new(&temp_path, format!("failed to write temp file: {e}")))?;
    fs::rename(&temp_path, path)
        .map_err(|e| StorageError::new(path, format!("failed to rename temp file: {e}")))?;
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<String, StorageError> {
    fs::read_to_string(path).map_err(|e| StorageError::new(path, format!("failed to read: {e}")))
}

pub(crate) fn remove_file(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::new(path, format!("failed to remove: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_numbered_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for seq in [3, 1, 12] {
            write_atomic(&dir.path().join(numbered_name("rules", seq, "snap")), "x").unwrap();
        }
        fs::write(dir.path().join("rules-abc.snap"), "x").unwrap();
        fs::write(dir.path().join("other-0000000002.snap"), "x").unwrap();

        let files = numbered_files(dir.path(), "rules", "snap").unwrap();
        let seqs: Vec<u64> = files.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 3, 12]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = numbered_files(&dir.path().join("nope"), "rules", "snap").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(numbered_name("perm", 1, "rec"));
        write_atomic(&path, "content").unwrap();
        assert_eq!(read_file(&path).unwrap(), "content");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
