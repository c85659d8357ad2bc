//! Parity stage: create PAR2 recovery files with parpar.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::par2;
use super::traits::StageAdapter;
use crate::config::AppConfig;
use crate::task::files::{is_parity_file, scan_output_folder};
use crate::task::{TaskConfig, TaskStep};
use crate::utils::fs::io_error;
use crate::{Error, Result};

static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^Calculating\s*:\s*([\d.,]+)%").ok());

pub struct ProtectAdapter {
    par_path: String,
}

impl ProtectAdapter {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_par_path(config.commands.par.clone())
    }

    pub fn with_par_path(path: impl Into<String>) -> Self {
        Self {
            par_path: path.into(),
        }
    }

    /// Remove parity files left by an earlier attempt.
    fn remove_stale_parity(task: &TaskConfig) -> Result<()> {
        let scan = scan_output_folder(&task.rar_par_folder_path)?;
        for path in scan.files.iter().filter(|p| is_parity_file(p)) {
            debug!(path = %path.display(), "Removing stale parity file");
            std::fs::remove_file(path).map_err(|e| io_error("removing parity file", path, e))?;
        }
        Ok(())
    }

    /// Files to protect: the archive volumes, or the raw inputs when the
    /// archive stage was skipped.
    fn input_files(task: &TaskConfig) -> Result<(Vec<PathBuf>, u64)> {
        if task.task_settings.rar_settings.skip_rar_creation {
            let raw = &task.task_variables.raw_files;
            if !raw.is_empty() {
                let files = raw.iter().map(|f| f.absolute_path.clone()).collect();
                let size = raw.iter().map(|f| f.size).sum();
                return Ok((files, size));
            }
            let files = task.task_settings.posting_settings.files.clone();
            return Ok((files, task.task_variables.raw_size.unwrap_or(0)));
        }

        let scan = scan_output_folder(&task.rar_par_folder_path)?;
        let files: Vec<PathBuf> = scan
            .files
            .into_iter()
            .filter(|p| !is_parity_file(p))
            .collect();
        let size = files
            .iter()
            .map(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0))
            .sum();
        Ok((files, size))
    }
}

impl StageAdapter for ProtectAdapter {
    fn step(&self) -> TaskStep {
        TaskStep::Protect
    }

    fn program(&self) -> &str {
        &self.par_path
    }

    fn build_arguments(&self, task: &mut TaskConfig) -> Result<Vec<String>> {
        Self::remove_stale_parity(task)?;

        let (files, total_size) = Self::input_files(task)?;
        if files.is_empty() {
            return Err(Error::validation(format!(
                "No files to protect in {}",
                task.rar_par_folder_path.display()
            )));
        }

        let par = &task.task_settings.par_settings;
        let (slices, redundancy) = if par.automatic_params {
            let params = par2::compute_parameters(
                total_size,
                &task.task_settings.nyuu_settings.article_size,
            )?;
            (params.slice_arg(), params.redundancy_arg())
        } else {
            (par.slices.clone(), par.redundancy.clone())
        };

        let par_file = task
            .rar_par_folder_path
            .join(format!("{}.par2", task.rar_par_filename));

        let mut args = vec![
            format!("-r{redundancy}"),
            format!("-s{slices}"),
            "--min-input-slices".to_string(),
            par.min_slices.clone(),
            "--max-input-slices".to_string(),
            par.max_slices.clone(),
            "--out".to_string(),
            par_file.to_string_lossy().into_owned(),
        ];
        args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));

        Ok(args)
    }

    fn parse_progress(&self, line: &str) -> Option<f64> {
        let re = PROGRESS_RE.as_ref()?;
        let caps = re.captures(line.trim())?;
        caps.get(1)?.as_str().replace(',', ".").parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_in(folder: &std::path::Path) -> TaskConfig {
        let mut task = TaskConfig::default();
        task.rar_par_filename = "Show".to_string();
        task.rar_par_folder_path = folder.to_path_buf();
        task
    }

    #[test]
    fn automatic_parameters_over_archive_volumes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show.part1.rar"), vec![0u8; 4096]).unwrap();
        std::fs::write(dir.path().join("Show.part2.rar"), vec![0u8; 1024]).unwrap();
        std::fs::write(dir.path().join("Show.par2"), b"old").unwrap();
        std::fs::write(dir.path().join("Show.vol0+1.par2"), b"old").unwrap();

        let adapter = ProtectAdapter::with_par_path("parpar");
        let mut task = task_in(dir.path());
        let args = adapter.build_arguments(&mut task).unwrap();

        assert!(!dir.path().join("Show.par2").exists());
        assert!(!dir.path().join("Show.vol0+1.par2").exists());

        assert_eq!(args[0], "-r18%");
        assert_eq!(args[1], "-s716800b");
        assert_eq!(&args[2..6], ["--min-input-slices", "1", "--max-input-slices", "32000"]);
        assert_eq!(args[6], "--out");
        assert!(args[7].ends_with("Show.par2"));
        assert_eq!(args.len(), 10);
        assert!(args[8].ends_with("Show.part1.rar"));
        assert!(args[9].ends_with("Show.part2.rar"));
    }

    #[test]
    fn manual_parameters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show.rar"), b"data").unwrap();

        let adapter = ProtectAdapter::with_par_path("parpar");
        let mut task = task_in(dir.path());
        task.task_settings.par_settings.automatic_params = false;
        let args = adapter.build_arguments(&mut task).unwrap();

        assert_eq!(args[0], "-r8%");
        assert_eq!(args[1], "-s0.5w*10");
    }

    #[test]
    fn skipped_archive_protects_raw_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ProtectAdapter::with_par_path("parpar");
        let mut task = task_in(dir.path());
        task.task_settings.rar_settings.skip_rar_creation = true;
        task.task_settings.posting_settings.files = vec![PathBuf::from("/in/a.mkv")];

        let args = adapter.build_arguments(&mut task).unwrap();
        assert_eq!(args.last().map(String::as_str), Some("/in/a.mkv"));
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ProtectAdapter::with_par_path("parpar");
        assert!(adapter.build_arguments(&mut task_in(dir.path())).is_err());
    }

    #[test]
    fn progress_accepts_comma_decimals() {
        let adapter = ProtectAdapter::with_par_path("parpar");
        assert_eq!(adapter.parse_progress("Calculating : 10,85%"), Some(10.85));
        assert_eq!(adapter.parse_progress("Calculating: 99.5%"), Some(99.5));
        assert_eq!(adapter.parse_progress("Input data: 1.2 GiB"), None);
    }

    #[test]
    fn error_words() {
        let adapter = ProtectAdapter::with_par_path("parpar");
        assert!(adapter.is_error_line("Failed to open file"));
        assert!(adapter.is_error_line("ERROR: out of memory"));
        assert!(!adapter.is_error_line("Writing recovery data"));
    }
}
