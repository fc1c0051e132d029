use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use super::filter::CompiledFilter;
use crate::error::Error;

/// Enumerate the PDFs under `root` that pass `filter` and none of the ignore
/// globs, in a stable (file-name sorted, depth-first) order.
///
/// Symlinks are never followed, so every returned path is canonical once the
/// root is. Subdirectories that cannot be read are logged and skipped; a root
/// that cannot be read is an error.
pub fn collect_pdf_candidates(
    root: &Path,
    recursive: bool,
    filter: &CompiledFilter,
    ignore_globs: &[String],
) -> Result<Vec<PathBuf>, Error> {
    let root = check_root(root)?;
    let ignore_patterns = compile_ignore_patterns(ignore_globs);

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .max_depth(if recursive { usize::MAX } else { 1 });

    let mut candidates = Vec::new();
    let entries = walker.into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
    });

    for entry_result in entries {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                let location = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                warn!("Skipping unreadable entry {}: {}", location, err);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_pdf_extension(entry.path()) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                error!("Error getting metadata for {}: {}", entry.path().display(), err);
                continue;
            }
        };

        if filter.accepts(entry.path(), &metadata) {
            candidates.push(entry.into_path());
        } else {
            debug!("Filtered out {}", entry.path().display());
        }
    }

    Ok(candidates)
}

fn check_root(root: &Path) -> Result<PathBuf, Error> {
    let canonical = match fs::canonicalize(root) {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::RootNotFound(root.to_path_buf()))
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            return Err(Error::PermissionDenied(root.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };

    if !canonical.is_dir() {
        return Err(Error::NotADirectory(root.to_path_buf()));
    }

    if let Err(err) = fs::read_dir(&canonical) {
        if err.kind() == io::ErrorKind::PermissionDenied {
            return Err(Error::PermissionDenied(root.to_path_buf()));
        }
        return Err(err.into());
    }

    Ok(canonical)
}

fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}
