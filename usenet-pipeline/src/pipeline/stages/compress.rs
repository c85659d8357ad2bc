//! Archive stage: store the inputs in (optionally encrypted) rar volumes.

use std::sync::LazyLock;

use regex::Regex;

use super::traits::{StageAdapter, contains_any_ignore_case};
use crate::config::AppConfig;
use crate::task::{TaskConfig, TaskStep};
use crate::{Error, Result};

static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})%$").ok());

pub struct CompressAdapter {
    rar_path: String,
}

impl CompressAdapter {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_rar_path(config.commands.rar.clone())
    }

    pub fn with_rar_path(path: impl Into<String>) -> Self {
        Self {
            rar_path: path.into(),
        }
    }
}

/// Volume size for a payload of `size_mb` megabytes.
pub fn automatic_volume_size(size_mb: u64) -> &'static str {
    match size_mb {
        0..100 => "50m",
        100..1000 => "100m",
        1000..10000 => "200m",
        _ => "500m",
    }
}

impl StageAdapter for CompressAdapter {
    fn step(&self) -> TaskStep {
        TaskStep::Compress
    }

    fn program(&self) -> &str {
        &self.rar_path
    }

    fn build_arguments(&self, task: &mut TaskConfig) -> Result<Vec<String>> {
        let rar = &task.task_settings.rar_settings;
        let files = &task.task_settings.posting_settings.files;
        if files.is_empty() {
            return Err(Error::validation("No input files selected"));
        }

        let mut archive_name = task.rar_par_filename.clone();
        if !archive_name.to_ascii_lowercase().ends_with(".rar") {
            archive_name.push_str(".rar");
        }
        let archive = task.rar_par_folder_path.join(archive_name);

        let mut args = vec!["a".to_string(), "-x*@eaDir/*".to_string()];
        if !rar.recursion {
            args.push("-r0".to_string());
        }
        args.push("-m0".to_string());
        args.push(archive.to_string_lossy().into_owned());

        if !task.password.is_empty() {
            let flag = if rar.encrypt_headers { "-hp" } else { "-p" };
            args.push(format!("{flag}{}", task.password));
        }

        if rar.automatic_volumes {
            let size_mb = task.task_variables.raw_size.unwrap_or(0) / (1024 * 1024);
            args.push(format!("-v{}", automatic_volume_size(size_mb)));
        } else if !rar.volumes.trim().is_empty() {
            args.push(format!("-v{}", rar.volumes.trim()));
        }

        if rar.solid_archive {
            args.push("-s".to_string());
        }
        for exclude in &rar.excludes {
            args.push(format!("-x{exclude}"));
        }
        args.push("-ep1".to_string());
        args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));

        Ok(args)
    }

    fn parse_progress(&self, line: &str) -> Option<f64> {
        let re = PROGRESS_RE.as_ref()?;
        let caps = re.captures(line.trim())?;
        caps.get(1)?.as_str().parse().ok()
    }

    fn is_error_line(&self, line: &str) -> bool {
        contains_any_ignore_case(line, &["error", "cannot", "failed"])
    }
}
