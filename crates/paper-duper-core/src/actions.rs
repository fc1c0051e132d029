use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::cache::HashCache;
use crate::grouping::DuplicateGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteMode {
    /// Move to the platform trash / recycle bin.
    Trash,
    Permanent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    /// Already gone when their turn came; not an error.
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Every member of every group except its original.
pub fn retention_plan(groups: &[DuplicateGroup]) -> Vec<PathBuf> {
    groups
        .iter()
        .flat_map(|group| group.duplicates().iter().map(|m| m.path.clone()))
        .collect()
}

/// Remove `paths` one at a time. Deleted files are also evicted from `cache`.
pub fn delete_files(
    paths: &[PathBuf],
    mode: DeleteMode,
    cache: Option<&HashCache>,
) -> DeletionReport {
    let mut report = DeletionReport::default();

    for path in paths {
        if fs::symlink_metadata(path).is_err() {
            warn!("File '{}' no longer exists, skipping", path.display());
            report.missing.push(path.clone());
            continue;
        }

        match remove(path, mode) {
            Ok(()) => {
                debug!(
                    "{}: {}",
                    if mode == DeleteMode::Trash { "trashed" } else { "deleted" },
                    path.display()
                );
                if let Some(cache) = cache {
                    cache.remove(path);
                }
                report.deleted.push(path.clone());
            }
            Err(e) => {
                error!("Failed to remove '{}': {}", path.display(), e);
                report.failed.push((path.clone(), e));
            }
        }
    }

    info!(
        "Deletion finished: {} removed, {} missing, {} failed",
        report.deleted.len(),
        report.missing.len(),
        report.failed.len()
    );
    report
}

fn remove(path: &Path, mode: DeleteMode) -> Result<(), String> {
    match mode {
        DeleteMode::Trash => trash::delete(path).map_err(|e| format!("trash error: {}", e)),
        DeleteMode::Permanent => fs::remove_file(path).map_err(|e: io::Error| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{GroupMember, MatchMethod};
    use tempfile::TempDir;

    fn member(path: &str) -> GroupMember {
        GroupMember {
            path: PathBuf::from(path),
            size_bytes: 10,
            modified_ns: 0,
            page_count: 1,
        }
    }

    #[test]
    fn test_retention_plan_keeps_originals() {
        let groups = vec![
            DuplicateGroup {
                members: vec![member("/keep1.pdf"), member("/dup1.pdf"), member("/dup2.pdf")],
                method: MatchMethod::ContentHash,
                similarity: 1.0,
            },
            DuplicateGroup {
                members: vec![member("/keep2.pdf"), member("/dup3.pdf")],
                method: MatchMethod::ImageHash,
                similarity: 0.95,
            },
        ];
        let plan = retention_plan(&groups);
        assert_eq!(
            plan,
            vec![
                PathBuf::from("/dup1.pdf"),
                PathBuf::from("/dup2.pdf"),
                PathBuf::from("/dup3.pdf")
            ]
        );
    }

    #[test]
    fn test_permanent_delete_reports_missing() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present.pdf");
        fs::write(&present, b"x").unwrap();
        let absent = dir.path().join("absent.pdf");

        let report = delete_files(
            &[present.clone(), absent.clone()],
            DeleteMode::Permanent,
            None,
        );
        assert_eq!(report.deleted, vec![present.clone()]);
        assert_eq!(report.missing, vec![absent]);
        assert!(report.is_clean());
        assert!(!present.exists());
    }
}
