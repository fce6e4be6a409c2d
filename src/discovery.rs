use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::UploadError;

/// Extension recognized as a result-set document.
const RESULT_FILE_EXTENSION: &str = "sarif";

/// Recursively collects result files below `root`, sorted by path.
///
/// Symbolic links are never followed: a link to a directory would allow
/// infinite loops, and a link to a file would double-count results that are
/// also reachable through their real path. Returned paths are absolute.
pub(crate) fn discover_result_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.canonicalize().map_err(|source| UploadError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !entry.path_is_symlink())
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| has_result_extension(entry.path()))
        .map(|entry| entry.path().to_path_buf())
        .collect();
    // Sort by path string so the order is identical across platforms.
    files.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    debug!(
        "found {} result files under {}",
        files.len(),
        root.display()
    );
    Ok(files)
}

/// Returns the single-file input as a discovery result, failing when missing.
pub(crate) fn resolve_result_file(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(UploadError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }
        .into());
    }
    let canonical = path.canonicalize().map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(canonical)
}

pub(crate) fn has_result_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case(RESULT_FILE_EXTENSION))
}
