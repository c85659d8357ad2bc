//! Listing input files and classifying what the stages produce.

use std::path::{Path, PathBuf};

use crate::Result;
use crate::utils::fs::io_error;

use super::model::TaskVariableFile;

/// Expand the selected inputs into individual files.
///
/// Folders are walked recursively and each file is recorded with its path
/// inside the archive as `<folder-name>/<relative-path>`; plain files use
/// their own name. Listings are sorted so repeated runs agree.
pub fn collect_input_files(inputs: &[PathBuf]) -> Result<Vec<TaskVariableFile>> {
    let mut files = Vec::new();

    for input in inputs {
        let metadata = std::fs::metadata(input).map_err(|e| io_error("reading input", input, e))?;
        let name = file_name_of(input);

        if metadata.is_dir() {
            walk_dir(input, &name, &mut files)?;
        } else {
            files.push(TaskVariableFile {
                name: name.clone(),
                absolute_path: absolute(input),
                relative_path: Some(name),
                size: metadata.len(),
            });
        }
    }

    Ok(files)
}

fn walk_dir(dir: &Path, prefix: &str, out: &mut Vec<TaskVariableFile>) -> Result<()> {
    for entry in sorted_entries(dir)? {
        let name = file_name_of(&entry);
        let relative = format!("{prefix}/{name}");
        let metadata =
            std::fs::metadata(&entry).map_err(|e| io_error("reading input", &entry, e))?;

        if metadata.is_dir() {
            walk_dir(&entry, &relative, out)?;
        } else {
            out.push(TaskVariableFile {
                name,
                absolute_path: absolute(&entry),
                relative_path: Some(relative),
                size: metadata.len(),
            });
        }
    }
    Ok(())
}

/// Directory entries sorted by name.
pub fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let reader = std::fs::read_dir(dir).map_err(|e| io_error("listing directory", dir, e))?;
    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry.map_err(|e| io_error("listing directory", dir, e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Describe existing files; unreadable ones are reported with size 0.
pub fn describe_files(paths: &[PathBuf]) -> Vec<TaskVariableFile> {
    paths
        .iter()
        .map(|path| TaskVariableFile {
            name: file_name_of(path),
            absolute_path: path.clone(),
            relative_path: None,
            size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        })
        .collect()
}

pub fn total_size(files: &[TaskVariableFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

/// `.rar` and old-style `.r00` volumes.
pub fn is_archive_file(path: &Path) -> bool {
    extension_lower(path).is_some_and(|ext| ext.starts_with('r'))
}

pub fn is_parity_file(path: &Path) -> bool {
    extension_lower(path).is_some_and(|ext| ext == "par2")
}

/// Classified contents of a task working folder.
#[derive(Debug, Clone, Default)]
pub struct OutputScan {
    pub files: Vec<PathBuf>,
    pub rar_files: Vec<TaskVariableFile>,
    pub par_files: Vec<TaskVariableFile>,
}

impl OutputScan {
    pub fn rar_size(&self) -> u64 {
        total_size(&self.rar_files)
    }

    pub fn par_size(&self) -> u64 {
        total_size(&self.par_files)
    }
}

/// List the regular files of a working folder. A missing folder scans empty.
pub fn scan_output_folder(folder: &Path) -> Result<OutputScan> {
    if !folder.is_dir() {
        return Ok(OutputScan::default());
    }

    let files: Vec<PathBuf> = sorted_entries(folder)?
        .into_iter()
        .filter(|path| path.is_file())
        .collect();

    let described = describe_files(&files);
    let (rar_files, rest): (Vec<_>, Vec<_>) = described
        .into_iter()
        .partition(|f| is_archive_file(&f.absolute_path));
    let par_files = rest
        .into_iter()
        .filter(|f| is_parity_file(&f.absolute_path))
        .collect();

    Ok(OutputScan {
        files,
        rar_files,
        par_files,
    })
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
