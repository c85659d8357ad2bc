//! Posting stage: upload the prepared files with nyuu and write the NZB.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::traits::{CommandInvocation, StageAdapter};
use crate::config::AppConfig;
use crate::task::files::{describe_files, is_archive_file, scan_output_folder, total_size};
use crate::task::{TaskConfig, TaskStep};
use crate::{Error, Result};

static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}\.\d{2})%").ok());

/// Progress redraw prefixes: with the escape byte, and as seen once control
/// characters are stripped.
const PROGRESS_PREFIXES: [&str; 2] = ["\x1b[0G\x1b[0K", "[0G[0K"];

pub struct UploadAdapter {
    config: Arc<AppConfig>,
}

impl UploadAdapter {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    /// Files to post, archive volumes first.
    fn upload_files(task: &TaskConfig) -> Result<Vec<PathBuf>> {
        let mut files = scan_output_folder(&task.rar_par_folder_path)?.files;

        if task.task_settings.rar_settings.skip_rar_creation {
            let raw: Vec<PathBuf> = if task.task_variables.raw_files.is_empty() {
                task.task_settings.posting_settings.files.clone()
            } else {
                task.task_variables
                    .raw_files
                    .iter()
                    .map(|f| f.absolute_path.clone())
                    .collect()
            };
            for path in raw {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }

        files.sort_by_key(|path| (!is_archive_file(path), path.clone()));
        Ok(files)
    }

    fn override_or_random(obfuscate: bool, enabled: bool, value: &str) -> Option<String> {
        if obfuscate {
            Some(uuid::Uuid::new_v4().to_string())
        } else if enabled {
            Some(value.to_string())
        } else {
            None
        }
    }
}

impl StageAdapter for UploadAdapter {
    fn step(&self) -> TaskStep {
        TaskStep::Upload
    }

    fn program(&self) -> &str {
        &self.config.commands.nyuu
    }

    fn build_arguments(&self, task: &mut TaskConfig) -> Result<Vec<String>> {
        let server_id = &task.task_settings.server_id;
        let server = self
            .config
            .server(server_id)
            .ok_or_else(|| Error::config(format!("Server with ID {server_id} not found")))?;

        let nyuu = &task.task_settings.nyuu_settings;
        let posting = &task.task_settings.posting_settings;

        let mut args = vec![
            "--host".to_string(),
            server.server.clone(),
            "--port".to_string(),
            server.port.to_string(),
            "--user".to_string(),
            server.username.clone(),
            "--password".to_string(),
            server.password.clone(),
            "--connections".to_string(),
            server.connections.to_string(),
            "--groups".to_string(),
            posting.post_groups.clone(),
        ];

        if !posting.post_from.is_empty() {
            args.extend(["--from".to_string(), posting.post_from.clone()]);
        }
        if server.ssl {
            args.push("--ssl".to_string());
        }
        if !task.name.is_empty() {
            args.extend(["--nzb-title".to_string(), task.name.clone()]);
        }
        if nyuu.check_connections > 0 {
            args.extend([
                "--check-connections".to_string(),
                nyuu.check_connections.to_string(),
            ]);
        }
        args.extend([
            "--check-tries".to_string(),
            nyuu.check_tries.to_string(),
            "--check-delay".to_string(),
            nyuu.check_delay.clone(),
            "--check-retry-delay".to_string(),
            nyuu.check_retry_delay.clone(),
            "--check-post-tries".to_string(),
            nyuu.check_post_tries.to_string(),
            "--check-queue-size".to_string(),
            nyuu.check_queue_size.to_string(),
        ]);

        let naming = [
            (
                "--yenc-name",
                posting.obfuscate_yenc_name,
                nyuu.yenc_name_override,
                &nyuu.yenc_name,
            ),
            (
                "--subject",
                posting.obfuscate_subject,
                nyuu.subject_override,
                &nyuu.subject,
            ),
            (
                "--filename",
                posting.obfuscate_filename,
                nyuu.filename_override,
                &nyuu.filename,
            ),
        ];
        for (flag, obfuscate, enabled, value) in naming {
            if let Some(value) = Self::override_or_random(obfuscate, enabled, value) {
                args.extend([flag.to_string(), value]);
            }
        }

        let overrides = [
            ("--date", nyuu.date_override, &nyuu.date),
            ("--message-id", nyuu.message_id_override, &nyuu.message_id),
            (
                "--article-encoding",
                nyuu.article_encoding_override,
                &nyuu.article_encoding,
            ),
        ];
        for (flag, enabled, value) in overrides {
            if enabled {
                args.extend([flag.to_string(), value.clone()]);
            }
        }

        if nyuu.include_password_in_nzb && !task.password.is_empty() {
            args.extend(["--nzb-password".to_string(), task.password.clone()]);
        }

        args.extend([
            "--article-size".to_string(),
            nyuu.article_size.clone(),
            "--nzb-file-mode".to_string(),
            "defer".to_string(),
            "--progress".to_string(),
            "stdout".to_string(),
        ]);

        let nzb_file = self
            .config
            .folders
            .nzb_output_folder
            .join(format!("{}.nzb", task.rar_par_filename));
        args.extend([
            "-o".to_string(),
            nzb_file.to_string_lossy().into_owned(),
            "-O".to_string(),
        ]);

        let files = Self::upload_files(task)?;
        if files.is_empty() {
            return Err(Error::validation(format!(
                "No files found to upload in {}",
                task.rar_par_folder_path.display()
            )));
        }
        args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));

        task.nzb_file = nzb_file;
        let posted = describe_files(&files);
        task.task_variables.nyuu_size = Some(total_size(&posted));
        task.task_variables.nyuu_files = posted;

        Ok(args)
    }

    fn invocation(&self, task: &mut TaskConfig) -> Result<CommandInvocation> {
        let args = self.build_arguments(task)?;
        Ok(CommandInvocation {
            program: self.program().to_string(),
            args,
            output_dirs: vec![
                task.rar_par_folder_path.clone(),
                self.config.folders.nzb_output_folder.clone(),
            ],
        })
    }

    fn parse_progress(&self, line: &str) -> Option<f64> {
        if !PROGRESS_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return None;
        }
        let re = PROGRESS_RE.as_ref()?;
        let caps = re.captures(line)?;
        caps.get(1)?.as_str().parse().ok()
    }
}
