//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO failures so that task
//! error text says what was being touched.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists (synchronous variant).
pub fn ensure_parent_dir_sync(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all_sync_with_op("creating directory", parent)
}

/// Remove a file or a whole directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error("inspecting", path, e)),
    };

    if metadata.is_dir() {
        std::fs::remove_dir_all(path).map_err(|e| io_error("removing directory", path, e))
    } else {
        std::fs::remove_file(path).map_err(|e| io_error("removing file", path, e))
    }
}
