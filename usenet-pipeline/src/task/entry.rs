//! The per-task stage machine.
//!
//! A task walks `Compress -> Protect -> Upload -> Finish`, one stage per
//! [`Task::run_next_step`] call. A failing stage leaves the step where it is
//! and returns `false`; the queue manager then finalizes the task as `Error`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::files::{collect_input_files, scan_output_folder, total_size};
use super::model::{CommandData, ContentTemplateData, TaskConfig, TaskStep};
use super::naming::{generate_name, random_sender};
use super::settings::TaskSettings;
use super::variables::VariableMap;
use crate::Result;
use crate::config::AppConfig;
use crate::history::HistoryStore;
use crate::pipeline::events::EventBus;
use crate::pipeline::progress::ProgressReporter;
use crate::pipeline::runner::CommandExecutor;
use crate::pipeline::stages::{CompressAdapter, ProtectAdapter, StageAdapter, UploadAdapter};
use crate::utils::filename::sanitize_path_component;
use crate::utils::fs::{ensure_dir_all_sync_with_op, ensure_parent_dir_sync, io_error, remove_path};

/// What a stage needs from the outside world.
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<AppConfig>,
    pub executor: Arc<dyn CommandExecutor>,
    pub events: EventBus,
}

/// A queued task: its record plus scheduler bookkeeping.
#[derive(Debug, Clone)]
pub struct Task {
    pub config: TaskConfig,
    /// A stage of this task is executing right now.
    pub currently_running: bool,
    /// Bumped whenever the entry is replaced by a resubmission.
    revision: u64,
}

impl Task {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            currently_running: false,
            revision: 0,
        }
    }

    pub fn from_settings(settings: TaskSettings) -> Self {
        Self::new(TaskConfig::new(settings))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Take the place of `existing` in a queue, keeping its progress.
    pub(crate) fn supersede(&mut self, existing: &Task) {
        self.config.merge_in_flight(&existing.config);
        if self.config.created_at.is_none() {
            self.config.created_at = existing.config.created_at;
        }
        self.currently_running = existing.currently_running;
        self.revision = existing.revision + 1;
    }

    /// Fold a finished stage run back into this queue entry.
    ///
    /// If the entry was not replaced while the stage ran, the run's record
    /// wins wholesale. Otherwise the new settings are kept and only the
    /// progress of the run is carried over.
    pub(crate) fn absorb_stage_result(&mut self, run: Task) {
        if run.revision == self.revision {
            self.config = run.config;
            return;
        }

        debug!(task_id = %self.id(), "Merging stage result into resubmitted task");
        self.config.merge_in_flight(&run.config);
        self.config.rar_par_filename = run.config.rar_par_filename;
        self.config.rar_par_folder_path = run.config.rar_par_folder_path;
        self.config.rar_par_files = run.config.rar_par_files;
        self.config.nzb_file = run.config.nzb_file;
        self.config.task_variables = run.config.task_variables;
        if self.config.name.is_empty() {
            self.config.name = run.config.name;
        }
    }

    /// Fill in what the operator left blank: id, name, password, sender and
    /// the `fname` variable, then expand variables.
    pub fn generate_randoms(&mut self) {
        let config = &mut self.config;
        if config.id.is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }

        let posting = &config.task_settings.posting_settings;
        if let Some(first) = posting.files.first() {
            let fname = if first.is_dir() {
                first.file_name()
            } else {
                first.file_stem()
            };
            if let Some(fname) = fname {
                config.task_variables.fname = Some(fname.to_string_lossy().into_owned());
            }
        }

        if config.name.is_empty() {
            config.name = generate_name(&posting.name_settings);
        }
        if config.password.is_empty() {
            config.password = generate_name(&posting.password_settings);
        }
        if posting.post_from_randomized {
            config.task_settings.posting_settings.post_from = random_sender();
        }

        self.replace_variables();
    }

    /// Expand `{variables}` in the name, subject and working paths.
    pub fn replace_variables(&mut self) {
        let map = VariableMap::from_variables(&self.config.task_variables);
        let config = &mut self.config;

        config.name = map.render(&config.name);
        let subject = &mut config.task_settings.nyuu_settings.subject;
        *subject = map.render(subject);
        config.rar_par_filename = map.render(&config.rar_par_filename);
        config.rar_par_folder_path =
            PathBuf::from(map.render(&config.rar_par_folder_path.to_string_lossy()));
    }

    /// Reserve output locations and measure the inputs.
    ///
    /// The working folder and NZB are named after the task. When either
    /// already exists the previous output is deleted (replace mode) or the
    /// task is renamed to `<name> - N` with the lowest free N.
    pub fn preflight(&mut self, app: &AppConfig) -> Result<()> {
        let folders = &app.folders;

        let folder = loop {
            let file_name = sanitize_path_component(&self.config.name);
            let folder = folders.rarpar_folder.join(&file_name);
            let nzb = folders.nzb_output_folder.join(format!("{file_name}.nzb"));

            self.config.rar_par_filename = file_name.clone();
            self.config.rar_par_folder_path = folder.clone();
            self.config.nzb_file = nzb.clone();

            if app.replace_existing_posted_files {
                if folder.exists() || nzb.exists() {
                    info!(task_id = %self.id(), folder = %folder.display(), "Replacing existing output");
                }
                remove_path(&folder)?;
                remove_path(&nzb)?;
                break folder;
            }

            if !folder.exists() && !nzb.exists() {
                break folder;
            }

            let suffix = (1u32..)
                .find(|n| {
                    let candidate = format!("{file_name} - {n}");
                    !folders.rarpar_folder.join(&candidate).exists()
                        && !folders
                            .nzb_output_folder
                            .join(format!("{candidate}.nzb"))
                            .exists()
                })
                .unwrap_or(u32::MAX);

            let renamed = format!("{file_name} - {suffix}");
            info!(
                task_id = %self.id(),
                from = %self.config.name,
                to = %renamed,
                "Output already exists, renaming task"
            );
            self.config.name = renamed;
        };

        ensure_dir_all_sync_with_op("creating task folder", &folder)?;

        let raw_files = collect_input_files(&self.config.task_settings.posting_settings.files)?;
        self.config.task_variables.raw_size = Some(total_size(&raw_files));
        self.config.task_variables.raw_files = raw_files;
        self.replace_variables();
        Ok(())
    }

    /// Re-list the working folder and update the size and count variables.
    pub fn refresh_output_files(&mut self) -> Result<()> {
        let scan = scan_output_folder(&self.config.rar_par_folder_path)?;
        let vars = &mut self.config.task_variables;

        vars.rar_size = Some(scan.rar_size());
        vars.rar_count = Some(scan.rar_files.len() as u64);
        vars.par_size = Some(scan.par_size());
        vars.par_count = Some(scan.par_files.len() as u64);
        vars.total_size = Some(scan.rar_size() + scan.par_size());
        vars.rar_files = scan.rar_files;
        vars.par_files = scan.par_files;
        self.config.rar_par_files = scan.files;

        self.replace_variables();
        Ok(())
    }

    fn refresh_output_files_logged(&mut self) {
        if let Err(e) = self.refresh_output_files() {
            warn!(task_id = %self.id(), error = %e, "Failed to list task output files");
        }
    }

    /// Run the current stage once.
    ///
    /// Returns `true` when the stage (or its skip) succeeded; the step has
    /// then advanced. Terminal tasks return immediately: `true` for FINISH,
    /// `false` for ERROR.
    pub async fn run_next_step(&mut self, ctx: &TaskContext) -> bool {
        let step = self.config.current_step;
        if self.config.finished || step.is_terminal() {
            return step == TaskStep::Finish;
        }

        match step {
            TaskStep::Compress => {
                if let Err(e) = self.preflight(&ctx.config) {
                    error!(task_id = %self.id(), error = %e, "Pre-flight checks failed");
                    self.config.rar_output = CommandData::failed(format!("Pre-flight checks failed: {e}"));
                    return false;
                }

                if self.config.task_settings.rar_settings.skip_rar_creation {
                    info!(task_id = %self.id(), "Skipping archive creation");
                    self.advance();
                    return true;
                }

                let adapter = CompressAdapter::new(&ctx.config);
                if !self.run_stage(&adapter, ctx).await {
                    return false;
                }
                self.refresh_output_files_logged();
            }
            TaskStep::Protect => {
                if self.config.task_settings.par_settings.skip_par_creation {
                    info!(task_id = %self.id(), "Skipping parity creation");
                    self.advance();
                    return true;
                }

                self.refresh_output_files_logged();
                let adapter = ProtectAdapter::new(&ctx.config);
                if !self.run_stage(&adapter, ctx).await {
                    return false;
                }
                self.refresh_output_files_logged();
            }
            TaskStep::Upload => {
                let adapter = UploadAdapter::new(Arc::clone(&ctx.config));
                if !self.run_stage(&adapter, ctx).await {
                    return false;
                }
            }
            TaskStep::Finish | TaskStep::Error => unreachable!("terminal steps return early"),
        }

        self.advance();
        true
    }

    fn advance(&mut self) {
        let next = self.config.current_step.next();
        debug!(task_id = %self.id(), from = %self.config.current_step, to = %next, "Advancing task");
        self.config.current_step = next;
    }

    async fn run_stage(&mut self, adapter: &dyn StageAdapter, ctx: &TaskContext) -> bool {
        let step = adapter.step();
        let started_at = Instant::now();

        let data = match adapter.invocation(&mut self.config) {
            Ok(invocation) => {
                let progress = ProgressReporter::new(self.id(), step, ctx.events.clone());
                ctx.executor.execute(&invocation, adapter, &progress).await
            }
            Err(e) => {
                warn!(task_id = %self.id(), step = %step, error = %e, "Could not build command");
                CommandData::failed(e.to_string())
            }
        };

        let elapsed = started_at.elapsed().as_millis() as u64;
        let success = data.succeeded();
        if let Some(output) = self.config.output_mut(step) {
            *output = data;
        }

        let vars = &mut self.config.task_variables;
        match step {
            TaskStep::Compress => vars.rar_time = Some(elapsed),
            TaskStep::Protect => vars.par_time = Some(elapsed),
            TaskStep::Upload => vars.nyuu_time = Some(elapsed),
            TaskStep::Finish | TaskStep::Error => {}
        }
        self.replace_variables();

        success
    }

    /// Close the task out as FINISH or ERROR and persist it.
    ///
    /// Cleanup (working folder, inputs) only happens on success. Failures
    /// here are logged and never change the outcome.
    pub fn finalize(&mut self, failed: bool, app: &AppConfig, history: &dyn HistoryStore) {
        self.config.current_step = if failed {
            TaskStep::Error
        } else {
            TaskStep::Finish
        };
        self.config.finished = true;
        self.config.error = self.config.aggregate_errors();

        if let Some(created_at) = self.config.created_at {
            let elapsed = (Utc::now() - created_at).num_milliseconds().max(0);
            self.config.task_variables.total_time = Some(elapsed as u64);
        }

        let posting = &self.config.task_settings.posting_settings;
        if !failed
            && !posting.save_rar_pars
            && let Err(e) = remove_path(&self.config.rar_par_folder_path)
        {
            warn!(task_id = %self.id(), error = %e, "Failed to remove task folder");
        }
        if !failed && posting.delete_uploaded_files {
            for input in &posting.files {
                if let Err(e) = remove_path(input) {
                    warn!(task_id = %self.config.id, error = %e, "Failed to delete uploaded input");
                }
            }
        }

        self.replace_variables();
        self.render_content_templates(app);

        match history.save(&self.config) {
            Ok(path) => self.config.log_file = Some(path),
            Err(e) => error!(task_id = %self.id(), error = %e, "Failed to save task history"),
        }

        info!(
            task_id = %self.id(),
            name = %self.config.name,
            step = %self.config.current_step,
            "Task finished"
        );
    }

    fn render_content_templates(&mut self, app: &AppConfig) {
        let mut map = VariableMap::from_variables(&self.config.task_variables);
        map.insert("name", self.config.name.clone());
        map.insert("password", self.config.password.clone());
        map.insert("groups", self.config.task_settings.posting_settings.post_groups.clone());

        let mut rendered = Vec::new();
        for selection in self
            .config
            .task_settings
            .content_templates
            .iter()
            .filter(|s| s.enabled)
        {
            let Some(template) = app.content_template(&selection.id) else {
                warn!(task_id = %self.config.id, template_id = %selection.id, "Content template not found");
                continue;
            };

            let base_name = if template.file_name.is_empty() {
                &template.name
            } else {
                &template.file_name
            };
            let file_name = sanitize_path_component(&format!(
                "{}{}",
                map.render(base_name),
                template.file_type
            ));
            let content = map.render(&template.template_content);

            if template.save_with_nzb {
                let target = self
                    .config
                    .nzb_file
                    .parent()
                    .map(|dir| dir.join(&file_name))
                    .unwrap_or_else(|| PathBuf::from(&file_name));
                let written = ensure_parent_dir_sync(&target).and_then(|_| {
                    std::fs::write(&target, &content)
                        .map_err(|e| io_error("writing content template", &target, e))
                });
                if let Err(e) = written {
                    warn!(task_id = %self.config.id, error = %e, "Failed to save content template");
                }
            }

            rendered.push(ContentTemplateData {
                active: true,
                content_template_id: selection.id.clone(),
                content,
                file_name,
            });
        }

        self.config.content_template_data = rendered;
    }
}
