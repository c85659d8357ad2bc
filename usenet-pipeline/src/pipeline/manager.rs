//! The two-queue scheduler.
//!
//! Tasks enter the compression queue, run their archive and parity stages
//! there, move to the upload queue for posting and leave through
//! finalization. Each queue admits at most one stage per tick and never runs
//! more stages than its worker limit. Stages execute on spawned tasks; the
//! queue lock is only held for bookkeeping and never across an await.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backpressure::BackpressureController;
use super::events::{EventBus, EventSubscription, PipelineEvent};
use super::runner::{CommandExecutor, ProcessRunner};
use super::status::QueueStatus;
use crate::config::{AppConfig, QueueConfig};
use crate::history::{HistoryStore, JsonHistoryStore};
use crate::task::{CommandData, Task, TaskConfig, TaskContext, TaskSettings, TaskStep};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Compression,
    Upload,
}

impl QueueKind {
    const ALL: [QueueKind; 2] = [QueueKind::Compression, QueueKind::Upload];

    /// Steps this queue runs.
    fn accepts(self, step: TaskStep) -> bool {
        match self {
            Self::Compression => step.is_compression_phase(),
            Self::Upload => step == TaskStep::Upload,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Compression => "compression",
            Self::Upload => "upload",
        }
    }
}

/// Configs of every queued task, per queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueuedTasks {
    pub compression: Vec<TaskConfig>,
    pub upload: Vec<TaskConfig>,
}

struct QueueState {
    compression: Vec<Task>,
    upload: Vec<Task>,
    approval: Vec<Task>,
    /// Ids removed from a queue while their stage was still running.
    draining: HashSet<String>,
    compression_paused: bool,
    upload_paused: bool,
    limits: QueueConfig,
}

impl QueueState {
    fn new(limits: QueueConfig) -> Self {
        Self {
            compression: Vec::new(),
            upload: Vec::new(),
            approval: Vec::new(),
            draining: HashSet::new(),
            compression_paused: false,
            upload_paused: false,
            limits,
        }
    }

    fn queue(&self, kind: QueueKind) -> &[Task] {
        match kind {
            QueueKind::Compression => &self.compression,
            QueueKind::Upload => &self.upload,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut Vec<Task> {
        match kind {
            QueueKind::Compression => &mut self.compression,
            QueueKind::Upload => &mut self.upload,
        }
    }

    fn position(&self, kind: QueueKind, id: &str) -> Option<usize> {
        self.queue(kind).iter().position(|t| t.id() == id)
    }

    fn find(&self, id: &str) -> Option<&Task> {
        QueueKind::ALL
            .into_iter()
            .find_map(|kind| self.queue(kind).iter().find(|t| t.id() == id))
    }

    fn worker_limit(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Compression => self.limits.max_compression_workers,
            QueueKind::Upload => self.limits.max_upload_workers,
        }
    }

    fn running(&self, kind: QueueKind) -> usize {
        self.queue(kind)
            .iter()
            .filter(|t| t.currently_running && kind.accepts(t.config.current_step))
            .count()
    }

    /// Prepared tasks waiting for an upload slot.
    fn upload_backlog(&self) -> usize {
        self.upload.iter().filter(|t| !t.config.started).count()
    }

    /// Mark the first eligible task as running and hand out a copy of it.
    fn admit(&mut self, kind: QueueKind) -> Option<Task> {
        if self.running(kind) >= self.worker_limit(kind) {
            return None;
        }

        let draining = &self.draining;
        let queue = match kind {
            QueueKind::Compression => &mut self.compression,
            QueueKind::Upload => &mut self.upload,
        };
        let task = queue.iter_mut().find(|t| {
            !t.currently_running
                && !t.config.finished
                && kind.accepts(t.config.current_step)
                && !draining.contains(t.id())
        })?;
        task.currently_running = true;
        task.config.started = true;
        Some(task.clone())
    }

    /// Put a task into the pipeline. A task whose id is already queued
    /// replaces that entry and keeps its progress.
    fn insert(&mut self, mut task: Task) -> TaskConfig {
        for kind in QueueKind::ALL {
            if let Some(index) = self.position(kind, task.id()) {
                let queue = self.queue_mut(kind);
                task.supersede(&queue[index]);
                debug!(task_id = %task.id(), queue = kind.as_str(), "Replacing queued task");
                let snapshot = task.config.clone();
                queue[index] = task;
                return snapshot;
            }
        }

        task.config.created_at = Some(Utc::now());
        let snapshot = task.config.clone();
        self.compression.push(task);
        snapshot
    }

    /// Remember a removed task whose stage has not returned yet.
    fn detach(&mut self, task: &Task) {
        if task.currently_running {
            self.draining.insert(task.id().to_string());
        }
    }

    fn take_approval(&mut self, id: &str) -> Option<Task> {
        let index = self.approval.iter().position(|t| t.id() == id)?;
        Some(self.approval.remove(index))
    }

    fn approval_configs(&self) -> Vec<TaskConfig> {
        self.approval.iter().map(|t| t.config.clone()).collect()
    }

    fn status(&self, auto_paused: bool) -> QueueStatus {
        let running = |queue: &[Task]| -> Vec<TaskConfig> {
            queue
                .iter()
                .filter(|t| t.currently_running)
                .map(|t| t.config.clone())
                .collect()
        };
        let queued = |queue: &[Task]| -> Vec<TaskConfig> {
            queue
                .iter()
                .filter(|t| !t.config.started)
                .map(|t| t.config.clone())
                .collect()
        };

        let compression_queued_configs = queued(&self.compression);
        let upload_queued_configs = queued(&self.upload);
        let suspended = self.compression_paused || auto_paused;

        QueueStatus {
            compression_active: !suspended,
            upload_active: !self.upload_paused,
            compression_running: self.running(QueueKind::Compression),
            compression_running_configs: running(&self.compression),
            upload_running: self.running(QueueKind::Upload),
            upload_running_configs: running(&self.upload),
            compression_queued: compression_queued_configs.len(),
            compression_queued_configs,
            upload_queued: upload_queued_configs.len(),
            upload_queued_configs,
            compression_paused: self.compression_paused,
            upload_paused: self.upload_paused,
            compression_auto_paused: auto_paused,
            compression_suspended: suspended,
        }
    }
}

/// Owns the compression and upload queues and the approval list.
pub struct TaskManager {
    config: Arc<AppConfig>,
    executor: Arc<dyn CommandExecutor>,
    history: Arc<dyn HistoryStore>,
    events: EventBus,
    state: Mutex<QueueState>,
    backpressure: BackpressureController,
    cancellation_token: CancellationToken,
    started: AtomicBool,
}

impl TaskManager {
    pub fn new(
        config: Arc<AppConfig>,
        executor: Arc<dyn CommandExecutor>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let limits = config.queue.clone();
        Self {
            backpressure: BackpressureController::new(limits.max_upload_queue_before_pause),
            state: Mutex::new(QueueState::new(limits)),
            config,
            executor,
            history,
            events: EventBus::default(),
            cancellation_token: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Real processes and JSON history in the configured folder.
    pub fn with_defaults(config: Arc<AppConfig>) -> Self {
        let history = JsonHistoryStore::new(&config.folders.task_history_folder);
        Self::new(config, Arc::new(ProcessRunner::new()), Arc::new(history))
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Spawn the two tick loops. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let period = Duration::from_millis(self.queue_config().tick_interval_ms.max(1));
        info!(tick_ms = period.as_millis() as u64, "Starting task manager");

        for kind in QueueKind::ALL {
            let manager = Arc::clone(self);
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(queue = kind.as_str(), "Tick loop shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            manager.tick(kind);
                        }
                    }
                }
            });
        }
    }

    /// Stop the tick loops. Stages already running finish on their own.
    pub fn shutdown(&self) {
        info!("Stopping task manager");
        self.cancellation_token.cancel();
    }

    fn tick(self: &Arc<Self>, kind: QueueKind) -> Option<JoinHandle<()>> {
        match kind {
            QueueKind::Compression => self.tick_compression(),
            QueueKind::Upload => self.tick_upload(),
        }
    }

    /// One scheduling pass over the compression queue. Returns the handle of
    /// the stage it started, if any.
    pub fn tick_compression(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        if state.compression_paused {
            return None;
        }

        let transition = self.backpressure.check_and_update(state.upload_backlog());
        let admitted = if self.backpressure.is_auto_paused() {
            None
        } else {
            state.admit(QueueKind::Compression)
        };
        let status = (transition.is_some() || admitted.is_some())
            .then(|| state.status(self.backpressure.is_auto_paused()));
        drop(state);

        if let Some(event) = transition {
            self.events.publish(PipelineEvent::BackpressureChanged(event));
        }
        if let Some(status) = status {
            self.events.publish(PipelineEvent::QueueChanged(Box::new(status)));
        }
        admitted.map(|task| self.spawn_step(QueueKind::Compression, task))
    }

    /// One scheduling pass over the upload queue.
    pub fn tick_upload(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        if state.upload_paused {
            return None;
        }

        let admitted = state.admit(QueueKind::Upload)?;
        let status = state.status(self.backpressure.is_auto_paused());
        drop(state);

        self.events.publish(PipelineEvent::QueueChanged(Box::new(status)));
        Some(self.spawn_step(QueueKind::Upload, admitted))
    }

    fn context(&self) -> TaskContext {
        TaskContext {
            config: Arc::clone(&self.config),
            executor: Arc::clone(&self.executor),
            events: self.events.clone(),
        }
    }

    fn spawn_step(self: &Arc<Self>, kind: QueueKind, mut task: Task) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            debug!(
                task_id = %task.id(),
                queue = kind.as_str(),
                step = %task.config.current_step,
                "Running task step"
            );
            let ctx = manager.context();
            let snapshot = task.clone();
            let stage = tokio::spawn(async move {
                let success = task.run_next_step(&ctx).await;
                (task, success)
            });

            let (task, success) = match stage.await {
                Ok(result) => result,
                Err(e) => {
                    error!(task_id = %snapshot.id(), error = %e, "Task step aborted");
                    let mut task = snapshot;
                    let step = task.config.current_step;
                    if let Some(output) = task.config.output_mut(step) {
                        *output = CommandData::failed(format!("Stage aborted: {e}"));
                    }
                    (task, false)
                }
            };
            if let Some((task, failed)) = manager.complete_step(kind, task, success) {
                manager.finalize(task, failed).await;
            }
        })
    }

    /// Fold a finished step back into its queue and decide where the task
    /// goes next. Returns the task when it has to be finalized.
    fn complete_step(&self, kind: QueueKind, run: Task, success: bool) -> Option<(Task, bool)> {
        let mut state = self.state.lock();
        let detached = state.draining.remove(run.id());
        let index = state.position(kind, run.id()).filter(|_| !detached);
        let Some(index) = index else {
            info!(task_id = %run.id(), "Task was unqueued while running, discarding its result");
            drop(state);
            self.publish_status();
            return None;
        };

        let entry = &mut state.queue_mut(kind)[index];
        entry.absorb_stage_result(run);
        entry.currently_running = false;
        let step = entry.config.current_step;

        let outcome = match (kind, success, step) {
            (_, false, _) => Some((state.queue_mut(kind).remove(index), true)),
            (QueueKind::Upload, true, _) => {
                Some((state.queue_mut(kind).remove(index), step != TaskStep::Finish))
            }
            (QueueKind::Compression, true, TaskStep::Upload) => {
                let mut task = state.compression.remove(index);
                task.config.started = false;
                info!(task_id = %task.id(), "Task prepared, moving to upload queue");
                state.upload.push(task);
                None
            }
            (QueueKind::Compression, true, TaskStep::Finish) => {
                Some((state.compression.remove(index), false))
            }
            (QueueKind::Compression, true, _) => None,
        };

        let status = state.status(self.backpressure.is_auto_paused());
        drop(state);
        self.events.publish(PipelineEvent::QueueChanged(Box::new(status)));
        outcome
    }

    async fn finalize(&self, mut task: Task, failed: bool) {
        let config = Arc::clone(&self.config);
        let history = Arc::clone(&self.history);
        let finished = tokio::task::spawn_blocking(move || {
            task.finalize(failed, &config, history.as_ref());
            task
        })
        .await;

        match finished {
            Ok(task) => {
                self.events
                    .publish(PipelineEvent::TaskFinished(Box::new(task.config)));
            }
            Err(e) => error!(error = %e, "Task finalization did not complete"),
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = self.queue_status();
        self.events.publish(PipelineEvent::QueueChanged(Box::new(status)));
    }

    fn publish_approvals(&self) {
        let approvals = self.approval_tasks();
        self.events
            .publish(PipelineEvent::ApprovalQueueChanged(approvals));
    }

    // Submission

    /// A new config from a profile (or the defaults) and an input list.
    pub fn fresh_task(&self, profile_id: Option<&str>, files: Vec<PathBuf>) -> TaskConfig {
        let (mut settings, used_profile) = self.config.new_task_settings(profile_id);
        if !files.is_empty() {
            settings.posting_settings.files = files;
        }

        let mut config = TaskConfig::new(settings);
        config.used_profile = used_profile;
        let mut task = Task::new(config);
        task.generate_randoms();
        task.config
    }

    /// Queue a config for processing. Resubmitting a queued id replaces the
    /// entry without losing its progress; an id waiting for approval leaves
    /// the approval list.
    pub fn queue_task_config(&self, config: TaskConfig) -> TaskConfig {
        let mut task = Task::new(config);
        task.generate_randoms();

        let (queued, left_approval) = {
            let mut state = self.state.lock();
            let left_approval = state.take_approval(task.id()).is_some();
            (state.insert(task), left_approval)
        };

        info!(task_id = %queued.id, name = %queued.name, "Task queued");
        if left_approval {
            debug!(task_id = %queued.id, "Removed task from approval list");
            self.publish_approvals();
        }
        self.publish_status();
        queued
    }

    pub fn queue_task_settings(
        &self,
        settings: TaskSettings,
        profile_id: Option<String>,
    ) -> TaskConfig {
        let mut config = TaskConfig::new(settings);
        config.used_profile = profile_id.unwrap_or_default();
        self.queue_task_config(config)
    }

    pub fn submit_files(&self, profile_id: Option<&str>, files: Vec<PathBuf>) -> TaskConfig {
        let config = self.fresh_task(profile_id, files);
        self.queue_task_config(config)
    }

    // Control

    pub fn pause_compression(&self) {
        self.state.lock().compression_paused = true;
        info!("Compression queue paused");
        self.publish_status();
    }

    /// Resume the compression queue and release any auto-pause.
    pub fn resume_compression(&self) {
        let transition = {
            let mut state = self.state.lock();
            state.compression_paused = false;
            self.backpressure.release(state.upload_backlog())
        };
        info!("Compression queue resumed");
        if let Some(event) = transition {
            self.events.publish(PipelineEvent::BackpressureChanged(event));
        }
        self.publish_status();
    }

    pub fn pause_upload(&self) {
        self.state.lock().upload_paused = true;
        info!("Upload queue paused");
        self.publish_status();
    }

    pub fn resume_upload(&self) {
        self.state.lock().upload_paused = false;
        info!("Upload queue resumed");
        self.publish_status();
    }

    pub fn pause_all(&self) {
        {
            let mut state = self.state.lock();
            state.compression_paused = true;
            state.upload_paused = true;
        }
        info!("All queues paused");
        self.publish_status();
    }

    pub fn resume_all(&self) {
        let transition = {
            let mut state = self.state.lock();
            state.compression_paused = false;
            state.upload_paused = false;
            self.backpressure.release(state.upload_backlog())
        };
        info!("All queues resumed");
        if let Some(event) = transition {
            self.events.publish(PipelineEvent::BackpressureChanged(event));
        }
        self.publish_status();
    }

    /// Remove a task from whichever queue holds it.
    ///
    /// A running stage is not interrupted: its process runs to completion
    /// and its result is discarded.
    pub fn unqueue(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            QueueKind::ALL.into_iter().find_map(|kind| {
                let index = state.position(kind, id)?;
                let task = state.queue_mut(kind).remove(index);
                state.detach(&task);
                Some(task)
            })
        };

        let Some(task) = removed else {
            return false;
        };
        if task.currently_running {
            warn!(
                task_id = %id,
                step = %task.config.current_step,
                "Unqueued a running task; its process keeps running until it exits"
            );
        }
        info!(task_id = %id, "Task unqueued");
        self.publish_status();
        true
    }

    /// Empty both queues. The approval list is kept.
    pub fn clear_all(&self) -> usize {
        let cleared = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let removed: Vec<Task> = state
                .compression
                .drain(..)
                .chain(state.upload.drain(..))
                .collect();
            for task in &removed {
                state.detach(task);
            }
            removed.len()
        };
        info!(cleared, "Cleared all queues");
        self.publish_status();
        cleared
    }

    // Approval

    /// Stage a task for manual approval instead of queuing it.
    pub fn add_approval_task(&self, config: TaskConfig) -> TaskConfig {
        let mut task = Task::new(config);
        task.generate_randoms();
        let staged = task.config.clone();

        {
            let mut state = self.state.lock();
            match state.approval.iter_mut().find(|t| t.id() == task.id()) {
                Some(existing) => *existing = task,
                None => state.approval.push(task),
            }
        }

        info!(task_id = %staged.id, name = %staged.name, "Task waiting for approval");
        self.publish_approvals();
        staged
    }

    pub fn approval_tasks(&self) -> Vec<TaskConfig> {
        self.state.lock().approval_configs()
    }

    pub fn approve(&self, id: &str) -> Result<TaskConfig> {
        let queued = {
            let mut state = self.state.lock();
            let task = state
                .take_approval(id)
                .ok_or_else(|| Error::not_found("approval task", id))?;
            state.insert(task)
        };

        info!(task_id = %id, "Task approved");
        self.publish_approvals();
        self.publish_status();
        Ok(queued)
    }

    /// Approve in order. Stops at the first unknown id; tasks approved
    /// before it stay queued.
    pub fn approve_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<TaskConfig>> {
        let mut approved = Vec::new();
        let mut missing = None;

        {
            let mut state = self.state.lock();
            for id in ids {
                let id = id.as_ref();
                match state.take_approval(id) {
                    Some(task) => approved.push(state.insert(task)),
                    None => {
                        missing = Some(id.to_string());
                        break;
                    }
                }
            }
        }

        if !approved.is_empty() {
            info!(count = approved.len(), "Tasks approved");
            self.publish_approvals();
            self.publish_status();
        }

        match missing {
            Some(id) => Err(Error::not_found("approval task", id)),
            None => Ok(approved),
        }
    }

    pub fn reject(&self, id: &str) -> Result<()> {
        self.state
            .lock()
            .take_approval(id)
            .ok_or_else(|| Error::not_found("approval task", id))?;

        info!(task_id = %id, "Task rejected");
        self.publish_approvals();
        Ok(())
    }

    /// Reject every id, or none of them if any is unknown.
    pub fn reject_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if let Some(missing) = ids
                .iter()
                .map(AsRef::as_ref)
                .find(|id| !state.approval.iter().any(|t| t.id() == *id))
            {
                return Err(Error::not_found("approval task", missing));
            }
            state
                .approval
                .retain(|t| !ids.iter().any(|id| id.as_ref() == t.id()));
        }

        info!(count = ids.len(), "Tasks rejected");
        self.publish_approvals();
        Ok(ids.len())
    }

    /// Replace a staged task's config with an edited one.
    pub fn save_approval_task(&self, config: TaskConfig) -> Result<TaskConfig> {
        let saved = {
            let mut state = self.state.lock();
            let existing = state
                .approval
                .iter_mut()
                .find(|t| t.id() == config.id)
                .ok_or_else(|| Error::not_found("approval task", config.id.clone()))?;

            let mut task = Task::new(config);
            task.generate_randoms();
            let saved = task.config.clone();
            *existing = task;
            saved
        };

        debug!(task_id = %saved.id, "Approval task updated");
        self.publish_approvals();
        Ok(saved)
    }

    // Queries

    pub fn queue_status(&self) -> QueueStatus {
        self.state
            .lock()
            .status(self.backpressure.is_auto_paused())
    }

    /// A queued task's config.
    pub fn task(&self, id: &str) -> Option<TaskConfig> {
        self.state.lock().find(id).map(|t| t.config.clone())
    }

    pub fn all_tasks(&self) -> QueuedTasks {
        let state = self.state.lock();
        let configs =
            |queue: &[Task]| -> Vec<TaskConfig> { queue.iter().map(|t| t.config.clone()).collect() };
        QueuedTasks {
            compression: configs(&state.compression),
            upload: configs(&state.upload),
        }
    }

    /// Both queues are empty.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.compression.is_empty() && state.upload.is_empty()
    }

    pub fn queue_config(&self) -> QueueConfig {
        self.state.lock().limits.clone()
    }

    /// Change worker limits and the backpressure threshold at runtime. The
    /// tick interval applies from the next [`start`](Self::start).
    pub fn set_queue_config(&self, limits: QueueConfig) -> Result<()> {
        limits.validate()?;
        self.backpressure
            .set_threshold(limits.max_upload_queue_before_pause);
        info!(
            compression_workers = limits.max_compression_workers,
            upload_workers = limits.max_upload_workers,
            upload_backlog_limit = limits.max_upload_queue_before_pause,
            "Queue limits updated"
        );
        self.state.lock().limits = limits;
        self.publish_status();
        Ok(())
    }

    // Events

    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_auto_paused(&self) -> bool {
        self.backpressure.is_auto_paused()
    }

    pub fn backpressure_threshold(&self) -> usize {
        self.backpressure.threshold()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::ProgressReporter;
    use crate::pipeline::stages::{CommandInvocation, StageAdapter};
    use crate::task::CommandData;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl CommandExecutor for NeverCalled {
        async fn execute(
            &self,
            _invocation: &CommandInvocation,
            _adapter: &dyn StageAdapter,
            _progress: &ProgressReporter,
        ) -> CommandData {
            panic!("no stage should run in these tests");
        }
    }

    fn manager() -> (tempfile::TempDir, Arc<TaskManager>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.folders.task_history_folder = dir.path().join("history");
        let history = JsonHistoryStore::new(&config.folders.task_history_folder);
        let manager = TaskManager::new(Arc::new(config), Arc::new(NeverCalled), Arc::new(history));
        (dir, Arc::new(manager))
    }

    fn named(name: &str) -> TaskConfig {
        let mut config = TaskConfig::new(TaskSettings::default());
        config.name = name.to_string();
        config
    }

    #[test]
    fn queued_tasks_get_creation_time_and_status() {
        let (_dir, manager) = manager();
        let queued = manager.queue_task_config(named("one"));

        assert!(queued.created_at.is_some());
        let status = manager.queue_status();
        assert_eq!(status.compression_queued, 1);
        assert_eq!(status.compression_running, 0);
        assert!(status.compression_active);
        assert!(!manager.is_idle());
        assert_eq!(manager.task(&queued.id).unwrap().name, "one");
    }

    #[test]
    fn resubmission_replaces_without_duplicating() {
        let (_dir, manager) = manager();
        let first = manager.queue_task_config(named("first"));

        let mut edited = first.clone();
        edited.name = "edited".to_string();
        manager.queue_task_config(edited);

        let all = manager.all_tasks();
        assert_eq!(all.compression.len(), 1);
        assert_eq!(all.compression[0].name, "edited");
        assert_eq!(all.compression[0].created_at, first.created_at);
    }

    #[tokio::test]
    async fn paused_queues_admit_nothing() {
        let (_dir, manager) = manager();
        manager.queue_task_config(named("one"));
        manager.pause_all();

        assert!(manager.tick_compression().is_none());
        assert!(manager.tick_upload().is_none());
        assert!(manager.queue_status().compression_suspended);
        assert!(!manager.queue_status().compression_active);
    }

    #[test]
    fn unknown_approval_ids_are_errors() {
        let (_dir, manager) = manager();
        let staged = manager.add_approval_task(named("staged"));

        assert!(matches!(manager.approve("nope"), Err(Error::NotFound { .. })));
        assert!(matches!(manager.reject("nope"), Err(Error::NotFound { .. })));
        assert!(matches!(
            manager.save_approval_task(named("other")),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            manager.reject_many(&[staged.id.as_str(), "nope"]),
            Err(Error::NotFound { .. })
        ));

        assert_eq!(manager.approval_tasks().len(), 1);
        assert!(manager.is_idle());
    }

    #[test]
    fn approve_many_stops_at_first_unknown_id() {
        let (_dir, manager) = manager();
        let a = manager.add_approval_task(named("a"));
        let b = manager.add_approval_task(named("b"));

        let result = manager.approve_many(&[a.id.as_str(), "missing", b.id.as_str()]);

        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(manager.task(&a.id).is_some());
        assert!(manager.task(&b.id).is_none());
        let waiting: Vec<_> = manager.approval_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(waiting, vec![b.id]);
    }

    #[test]
    fn unqueue_and_clear() {
        let (_dir, manager) = manager();
        let a = manager.queue_task_config(named("a"));
        manager.queue_task_config(named("b"));
        manager.add_approval_task(named("c"));

        assert!(manager.unqueue(&a.id));
        assert!(!manager.unqueue(&a.id));
        assert_eq!(manager.clear_all(), 1);
        assert!(manager.is_idle());
        assert_eq!(manager.approval_tasks().len(), 1);
    }

    #[test]
    fn queue_config_is_validated() {
        let (_dir, manager) = manager();
        let mut limits = manager.queue_config();
        limits.max_upload_workers = 0;
        assert!(manager.set_queue_config(limits).is_err());

        let mut limits = manager.queue_config();
        limits.max_upload_queue_before_pause = 5;
        manager.set_queue_config(limits).unwrap();
        assert_eq!(manager.backpressure_threshold(), 5);
        assert_eq!(manager.queue_config().max_upload_queue_before_pause, 5);
    }
}
