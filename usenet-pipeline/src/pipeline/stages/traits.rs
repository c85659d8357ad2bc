//! Stage adapter trait and the invocation it produces.

use std::path::PathBuf;

use crate::Result;
use crate::task::{TaskConfig, TaskStep};

/// A fully built external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Directories that must exist before the tool starts.
    pub output_dirs: Vec<PathBuf>,
}

impl CommandInvocation {
    /// Human-readable command line for the task record.
    pub fn display(&self) -> String {
        process_utils::display_command_line(&self.program, &self.args)
    }
}

/// Turns a task into an external tool call and interprets the tool's output.
///
/// Adapters are pure with respect to process handling: building arguments may
/// inspect or prepare the task's working folder, but spawning and streaming
/// belong to the [`CommandExecutor`](crate::pipeline::runner::CommandExecutor).
pub trait StageAdapter: Send + Sync {
    /// The stage this adapter runs.
    fn step(&self) -> TaskStep;

    fn program(&self) -> &str;

    /// Build the argument list. May record derived values on the task, such
    /// as the NZB path or the list of files to post.
    fn build_arguments(&self, task: &mut TaskConfig) -> Result<Vec<String>>;

    /// Percentage carried by a progress record, or `None` for normal output.
    fn parse_progress(&self, line: &str) -> Option<f64>;

    /// Whether a non-progress line should also go to the error buffer.
    fn is_error_line(&self, line: &str) -> bool {
        contains_any_ignore_case(line, &["error", "failed", "fail"])
    }

    fn invocation(&self, task: &mut TaskConfig) -> Result<CommandInvocation> {
        let args = self.build_arguments(task)?;
        Ok(CommandInvocation {
            program: self.program().to_string(),
            args,
            output_dirs: vec![task.rar_par_folder_path.clone()],
        })
    }
}

pub(crate) fn contains_any_ignore_case(line: &str, needles: &[&str]) -> bool {
    let lower = line.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}
