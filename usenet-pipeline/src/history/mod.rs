//! Durable record of finished tasks.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::Result;
use crate::task::TaskConfig;
use crate::utils::filename::history_file_name;
use crate::utils::fs::{ensure_dir_all_sync_with_op, io_error};

/// Persists finalized task records.
pub trait HistoryStore: Send + Sync {
    /// Write the record and return where it went.
    fn save(&self, task: &TaskConfig) -> Result<PathBuf>;
}

/// One pretty-printed JSON file per task, named
/// `<unix-millis> - <task name>.json`.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    folder: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn record_files(&self) -> Result<Vec<PathBuf>> {
        if !self.folder.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.folder)
            .map_err(|e| io_error("listing history folder", &self.folder, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| io_error("listing history folder", &self.folder, e))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every readable record, oldest first. Unreadable files are skipped.
    pub fn load_all(&self) -> Result<Vec<TaskConfig>> {
        let mut tasks = Vec::new();
        for path in self.record_files()? {
            let content =
                std::fs::read_to_string(&path).map_err(|e| io_error("reading history", &path, e))?;
            match serde_json::from_str::<TaskConfig>(&content) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable history record"),
            }
        }
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    /// Remove every record. Returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let files = self.record_files()?;
        for path in &files {
            std::fs::remove_file(path).map_err(|e| io_error("removing history", path, e))?;
        }
        Ok(files.len())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn save(&self, task: &TaskConfig) -> Result<PathBuf> {
        ensure_dir_all_sync_with_op("creating history folder", &self.folder)?;

        let path = self
            .folder
            .join(history_file_name(&task.name, Utc::now().timestamp_millis()));

        let mut record = task.clone();
        record.log_file = Some(path.clone());
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json).map_err(|e| io_error("writing history", &path, e))?;

        debug!(task_id = %task.id, path = %path.display(), "Saved task history");
        Ok(path)
    }
}
