//! Task records: the persisted state of a single posting job.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::settings::TaskSettings;

/// Pipeline stage of a task.
///
/// Stages only ever move forward in declaration order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStep {
    #[default]
    Compress,
    Protect,
    Upload,
    Finish,
    Error,
}

impl TaskStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finish | Self::Error)
    }

    /// Stages handled by the pre-upload queue.
    pub fn is_compression_phase(self) -> bool {
        matches!(self, Self::Compress | Self::Protect)
    }

    /// The stage that follows a successful run of `self`.
    pub fn next(self) -> Self {
        match self {
            Self::Compress => Self::Protect,
            Self::Protect => Self::Upload,
            Self::Upload => Self::Finish,
            terminal => terminal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Protect => "protect",
            Self::Upload => "upload",
            Self::Finish => "finish",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one external tool run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandData {
    pub output: String,
    pub error: String,
    pub started: bool,
    pub finished: bool,
    pub exit_code: Option<i32>,
    pub executed_command: String,
    pub last_message: String,
    pub last_known_progress: f64,
}

impl CommandData {
    /// A record for a run that failed before any process was spawned.
    pub fn failed(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if !message.ends_with('\n') {
            message.push('\n');
        }
        Self {
            output: message.clone(),
            error: message,
            started: true,
            finished: true,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A file known to the task, with its size at the time it was listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskVariableFile {
    pub name: String,
    pub absolute_path: PathBuf,
    /// Path inside the archive: `<root-folder>/<relative>` or the bare name.
    pub relative_path: Option<String>,
    pub size: u64,
}

/// Measurements collected while the task runs. Times are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskVariables {
    pub fname: Option<String>,
    pub raw_size: Option<u64>,
    pub rar_size: Option<u64>,
    pub rar_count: Option<u64>,
    pub rar_time: Option<u64>,
    pub par_size: Option<u64>,
    pub par_count: Option<u64>,
    pub par_time: Option<u64>,
    pub total_size: Option<u64>,
    pub nyuu_size: Option<u64>,
    pub nyuu_time: Option<u64>,
    pub total_time: Option<u64>,
    pub raw_files: Vec<TaskVariableFile>,
    pub rar_files: Vec<TaskVariableFile>,
    pub par_files: Vec<TaskVariableFile>,
    pub nyuu_files: Vec<TaskVariableFile>,
}

/// A rendered content template attached to a finished task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentTemplateData {
    pub active: bool,
    pub content_template_id: String,
    pub content: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Picked up by a queue at least once.
    pub started: bool,
    pub finished: bool,
    pub name: String,
    pub password: String,
    pub rar_par_filename: String,
    pub rar_par_folder_path: PathBuf,
    pub rar_par_files: Vec<PathBuf>,
    pub nzb_file: PathBuf,
    pub error: String,
    pub current_step: TaskStep,
    pub log_file: Option<PathBuf>,
    pub used_profile: String,
    pub rar_output: CommandData,
    pub par_output: CommandData,
    pub nyuu_output: CommandData,
    pub task_settings: TaskSettings,
    pub task_variables: TaskVariables,
    pub content_template_data: Vec<ContentTemplateData>,
}

impl TaskConfig {
    pub fn new(task_settings: TaskSettings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_settings,
            ..Self::default()
        }
    }

    pub fn output(&self, step: TaskStep) -> Option<&CommandData> {
        match step {
            TaskStep::Compress => Some(&self.rar_output),
            TaskStep::Protect => Some(&self.par_output),
            TaskStep::Upload => Some(&self.nyuu_output),
            TaskStep::Finish | TaskStep::Error => None,
        }
    }

    pub fn output_mut(&mut self, step: TaskStep) -> Option<&mut CommandData> {
        match step {
            TaskStep::Compress => Some(&mut self.rar_output),
            TaskStep::Protect => Some(&mut self.par_output),
            TaskStep::Upload => Some(&mut self.nyuu_output),
            TaskStep::Finish | TaskStep::Error => None,
        }
    }

    /// Carry stage progress over from the entry this config replaces.
    ///
    /// Resubmitting a queued task keeps its place in the pipeline: stage
    /// outputs, the current stage and the started flag come from `existing`,
    /// everything else from `self`.
    pub fn merge_in_flight(&mut self, existing: &TaskConfig) {
        self.rar_output = existing.rar_output.clone();
        self.par_output = existing.par_output.clone();
        self.nyuu_output = existing.nyuu_output.clone();
        self.current_step = existing.current_step;
        self.started = existing.started;
    }

    /// Error text of every stage, newline separated.
    pub fn aggregate_errors(&self) -> String {
        [&self.rar_output, &self.par_output, &self.nyuu_output]
            .iter()
            .map(|data| data.error.trim_end())
            .filter(|error| !error.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
