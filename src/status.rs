//! Change detection ("status").
//!
//! Compares stored descriptor state to live filesystem state. Read-only
//! unless an update is explicitly requested.

use crate::descriptor::store::{DescriptorStore, RegisterOptions};
use crate::error::Error;
use chrono::{DateTime, FixedOffset, Local};
use std::path::PathBuf;
use tracing::debug;

/// One descriptor whose file is newer than its recorded state.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub data_path: PathBuf,
    pub descriptor_path: PathBuf,
    pub old_modified: DateTime<FixedOffset>,
    pub new_modified: DateTime<FixedOffset>,
}

/// Detect descriptors whose live mtime is strictly newer than the stored
/// `modified` timestamp. Ordered by path; never mutates.
pub fn detect_changes(store: &DescriptorStore) -> Result<Vec<StatusEntry>, Error> {
    let mut entries = Vec::new();
    for descriptor in store.list()? {
        let Some(real_path) = &descriptor.real_path else {
            continue;
        };
        let Ok(meta) = std::fs::metadata(real_path) else {
            // File gone; removal is an explicit operation, not a status flag.
            continue;
        };
        let live: DateTime<FixedOffset> = DateTime::<Local>::from(meta.modified()?).fixed_offset();
        if live > descriptor.modified {
            debug!(path = %descriptor.path, "needs re-add");
            entries.push(StatusEntry {
                data_path: real_path.clone(),
                descriptor_path: store.descriptor_path(&descriptor.path),
                old_modified: descriptor.modified,
                new_modified: live,
            });
        }
    }
    Ok(entries)
}

/// Detect changes and, when `update` is set, re-register each flagged file
/// in place (recomputing digest, size, and modified).
pub fn detect_and_update(store: &DescriptorStore, update: bool) -> Result<Vec<StatusEntry>, Error> {
    let entries = detect_changes(store)?;
    if update {
        for entry in &entries {
            store.register(&entry.data_path, RegisterOptions::default())?;
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use chrono::Duration;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DescriptorStore) {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::new(dir.path(), "proj");
        let store = DescriptorStore::open(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn test_no_changes_when_untouched() {
        let (dir, store) = fixture();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        store
            .register(Path::new("a.txt"), RegisterOptions::default())
            .unwrap();
        assert!(detect_changes(&store).unwrap().is_empty());
    }

    #[test]
    fn test_newer_file_is_flagged() {
        let (dir, store) = fixture();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let registered = store
            .register(Path::new("a.txt"), RegisterOptions::default())
            .unwrap();

        // Backdate the stored timestamp rather than sleeping.
        let mut stale = registered.clone();
        stale.modified = registered.modified - Duration::seconds(10);
        store.put(&stale).unwrap();

        let entries = detect_changes(&store).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].old_modified, stale.modified);
        assert!(entries[0].new_modified > entries[0].old_modified);
    }

    #[test]
    fn test_update_mode_refreshes_in_place() {
        let (dir, store) = fixture();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let registered = store
            .register(Path::new("a.txt"), RegisterOptions::default())
            .unwrap();
        let mut stale = registered.clone();
        stale.modified = registered.modified - Duration::seconds(10);
        store.put(&stale).unwrap();

        let flagged = detect_and_update(&store, true).unwrap();
        assert_eq!(flagged.len(), 1);
        assert!(detect_changes(&store).unwrap().is_empty());
    }

    #[test]
    fn test_detect_only_never_mutates() {
        let (dir, store) = fixture();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let registered = store
            .register(Path::new("a.txt"), RegisterOptions::default())
            .unwrap();
        let mut stale = registered.clone();
        stale.modified = registered.modified - Duration::seconds(10);
        store.put(&stale).unwrap();

        detect_and_update(&store, false).unwrap();
        assert_eq!(detect_changes(&store).unwrap().len(), 1);
    }
}
