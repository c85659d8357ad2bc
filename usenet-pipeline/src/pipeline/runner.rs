//! Running stage tools as child processes.
//!
//! The runner spawns the tool, reads stdout and stderr as records, routes
//! progress records to the [`ProgressReporter`] and everything else into the
//! stage's [`CommandData`]. It never returns an error: every failure,
//! including a missing executable, ends up in the record with a non-zero or
//! absent exit code.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::progress::ProgressReporter;
use super::record_reader::OutputRecordReader;
use super::stages::{CommandInvocation, StageAdapter};
use crate::task::CommandData;
use crate::utils::fs::ensure_dir_all_with_op;

static ANSI_ESCAPE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").ok());

/// Executes stage invocations. Tests substitute fakes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        adapter: &dyn StageAdapter,
        progress: &ProgressReporter,
    ) -> CommandData;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Strip escape sequences and control characters and trim.
pub fn sanitize_line(raw: &str) -> String {
    let without_escapes = match ANSI_ESCAPE_RE.as_ref() {
        Some(re) => re.replace_all(raw, ""),
        None => raw.into(),
    };
    without_escapes
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Route one output record into the stage record.
pub(crate) fn handle_record(
    raw: &str,
    adapter: &dyn StageAdapter,
    progress: &ProgressReporter,
    data: &mut CommandData,
) {
    if let Some(percentage) = adapter.parse_progress(raw) {
        data.last_known_progress = percentage;
        progress.report(percentage);
        return;
    }

    let line = sanitize_line(raw);
    if line.is_empty() {
        return;
    }

    if adapter.is_error_line(&line) {
        warn!(task_id = %progress.task_id(), step = %adapter.step(), "{}", line);
        data.error.push_str(&line);
        data.error.push('\n');
    } else {
        debug!(task_id = %progress.task_id(), step = %adapter.step(), "{}", line);
    }

    data.output.push_str(&line);
    data.output.push('\n');
    data.last_message = line;
}

fn spawn_record_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = OutputRecordReader::new(stream);
        loop {
            match reader.next_record().await {
                Ok(Some(record)) => {
                    if tx.send(record).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Output stream read failed");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl CommandExecutor for ProcessRunner {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        adapter: &dyn StageAdapter,
        progress: &ProgressReporter,
    ) -> CommandData {
        let mut data = CommandData {
            started: true,
            ..CommandData::default()
        };

        for dir in &invocation.output_dirs {
            if let Err(e) = ensure_dir_all_with_op("creating output folder", dir).await {
                warn!(task_id = %progress.task_id(), error = %e, "Output folder unavailable");
                let message = format!("Failed to create output folder: {e}\n");
                data.output.push_str(&message);
                data.error.push_str(&message);
                data.finished = true;
                return data;
            }
        }

        data.executed_command = invocation.display();
        info!(
            task_id = %progress.task_id(),
            step = %adapter.step(),
            "Running: {}",
            data.executed_command
        );

        let mut command = process_utils::tokio_command(&invocation.program);
        command.args(&invocation.args);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(task_id = %progress.task_id(), program = %invocation.program, error = %e, "Failed to spawn");
                let message = format!("Process error: {e}\n");
                data.output.push_str(&message);
                data.error.push_str(&message);
                data.exit_code = Some(1);
                data.finished = true;
                return data;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_record_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_record_reader(stderr, tx.clone());
        }
        // Readers hold the remaining senders; the loop ends when both pipes close.
        drop(tx);

        while let Some(record) = rx.recv().await {
            handle_record(&record, adapter, progress, &mut data);
        }

        match child.wait().await {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                let line = format!("Command exited with code {code}\n");
                data.output.push_str(&line);
                if code != 0 {
                    data.error.push_str(&line);
                }
                data.exit_code = Some(code);
            }
            Err(e) => {
                let message = format!("Process error: {e}\n");
                data.output.push_str(&message);
                data.error.push_str(&message);
                data.exit_code = Some(1);
            }
        }

        data.finished = true;
        info!(
            task_id = %progress.task_id(),
            step = %adapter.step(),
            exit_code = ?data.exit_code,
            "Stage process finished"
        );
        data
    }
}
