//! Scheduler behaviour with a fake stage executor.
//!
//! The fake creates the files each tool would produce so the real argument
//! builders, file scans and finalization run unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use usenet_pipeline::config::{AppConfig, QueueConfig, ServerSettings};
use usenet_pipeline::history::JsonHistoryStore;
use usenet_pipeline::pipeline::events::EventSubscription;
use usenet_pipeline::pipeline::progress::ProgressReporter;
use usenet_pipeline::pipeline::stages::{CommandInvocation, StageAdapter};
use usenet_pipeline::pipeline::{BackpressureEvent, CommandExecutor, PipelineEvent, TaskManager};
use usenet_pipeline::task::{CommandData, TaskConfig, TaskStep};

#[derive(Default)]
struct FakeExecutor {
    calls: Mutex<Vec<(String, TaskStep)>>,
    gate: Option<Arc<Semaphore>>,
    fail_step: Option<TaskStep>,
    panic_step: Option<TaskStep>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeExecutor {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn failing_at(step: TaskStep) -> Self {
        Self {
            fail_step: Some(step),
            ..Self::default()
        }
    }

    fn panicking_at(step: TaskStep) -> Self {
        Self {
            panic_step: Some(step),
            ..Self::default()
        }
    }

    fn steps(&self) -> Vec<TaskStep> {
        self.calls.lock().iter().map(|(_, step)| *step).collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        adapter: &dyn StageAdapter,
        progress: &ProgressReporter,
    ) -> CommandData {
        let step = adapter.step();
        self.calls.lock().push((progress.task_id().to_string(), step));

        if self.panic_step == Some(step) {
            panic!("executor crashed during {step}");
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let folder = &invocation.output_dirs[0];
        std::fs::create_dir_all(folder).unwrap();
        match step {
            TaskStep::Compress => {
                std::fs::write(folder.join("payload.part1.rar"), vec![0u8; 2048]).unwrap();
                std::fs::write(folder.join("payload.part2.rar"), vec![0u8; 1024]).unwrap();
            }
            TaskStep::Protect => {
                std::fs::write(folder.join("payload.par2"), vec![0u8; 256]).unwrap();
                std::fs::write(folder.join("payload.vol0+1.par2"), vec![0u8; 512]).unwrap();
            }
            TaskStep::Upload => {
                let nzb = invocation
                    .args
                    .iter()
                    .find(|arg| arg.ends_with(".nzb"))
                    .expect("upload arguments name an nzb");
                let nzb = Path::new(nzb);
                std::fs::create_dir_all(nzb.parent().unwrap()).unwrap();
                std::fs::write(nzb, "<nzb/>").unwrap();
            }
            TaskStep::Finish | TaskStep::Error => unreachable!(),
        }
        progress.report(100.0);

        self.running.fetch_sub(1, Ordering::SeqCst);

        let mut data = CommandData {
            started: true,
            finished: true,
            exit_code: Some(0),
            executed_command: invocation.display(),
            last_known_progress: 100.0,
            ..CommandData::default()
        };
        if self.fail_step == Some(step) {
            data.exit_code = Some(2);
            data.error = "boom\nCommand exited with code 2\n".to_string();
        }
        data
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: Arc<AppConfig>,
    manager: Arc<TaskManager>,
    executor: Arc<FakeExecutor>,
}

impl Harness {
    fn new(executor: FakeExecutor, limits: impl FnOnce(&mut QueueConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let mut config = AppConfig::default();
        config.folders.rarpar_folder = root.join("rarpar");
        config.folders.nzb_output_folder = root.join("nzb");
        config.folders.task_history_folder = root.join("history");
        config.servers.push(ServerSettings {
            id: "main".to_string(),
            is_default: true,
            server: "news.example.net".to_string(),
            ..ServerSettings::default()
        });
        limits(&mut config.queue);

        std::fs::create_dir_all(root.join("input/Holiday")).unwrap();
        std::fs::write(root.join("input/Holiday/a.mkv"), vec![1u8; 1000]).unwrap();
        std::fs::write(root.join("input/Holiday/b.mkv"), vec![2u8; 3000]).unwrap();

        let config = Arc::new(config);
        let executor = Arc::new(executor);
        let history = JsonHistoryStore::new(&config.folders.task_history_folder);
        let manager = Arc::new(TaskManager::new(
            Arc::clone(&config),
            executor.clone(),
            Arc::new(history),
        ));

        Self {
            _dir: dir,
            root,
            config,
            manager,
            executor,
        }
    }

    fn input(&self) -> PathBuf {
        self.root.join("input/Holiday")
    }

    fn fresh(&self) -> TaskConfig {
        self.manager.fresh_task(None, vec![self.input()])
    }

    fn history(&self) -> Vec<TaskConfig> {
        JsonHistoryStore::new(&self.config.folders.task_history_folder)
            .load_all()
            .unwrap()
    }

    /// Tick both queues until nothing is left, awaiting every started stage.
    async fn drain(&self) {
        for _ in 0..100 {
            if self.manager.is_idle() {
                return;
            }
            if let Some(handle) = self.manager.tick_compression() {
                handle.await.unwrap();
            }
            if let Some(handle) = self.manager.tick_upload() {
                handle.await.unwrap();
            }
        }
        panic!("queues did not drain");
    }
}

fn collect(events: &mut EventSubscription) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn finished(events: &[PipelineEvent]) -> Vec<TaskConfig> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::TaskFinished(task) => Some((**task).clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn task_runs_all_stages_and_is_recorded() {
    let h = Harness::new(FakeExecutor::default(), |_| {});
    let mut events = h.manager.subscribe();

    let queued = h.manager.queue_task_config(h.fresh());
    assert_eq!(queued.name, "Holiday");
    assert_eq!(queued.task_settings.server_id, "main");

    h.drain().await;

    assert_eq!(
        h.executor.steps(),
        vec![TaskStep::Compress, TaskStep::Protect, TaskStep::Upload]
    );

    let events = collect(&mut events);
    let done = finished(&events);
    assert_eq!(done.len(), 1);
    let task = &done[0];
    assert_eq!(task.current_step, TaskStep::Finish);
    assert!(task.finished);
    assert!(task.error.is_empty());

    let vars = &task.task_variables;
    assert_eq!(vars.raw_size, Some(4000));
    assert_eq!(vars.raw_files.len(), 2);
    assert_eq!(
        vars.raw_files[0].relative_path.as_deref(),
        Some("Holiday/a.mkv")
    );
    assert_eq!(vars.rar_size, Some(3072));
    assert_eq!(vars.rar_count, Some(2));
    assert_eq!(vars.par_size, Some(768));
    assert_eq!(vars.par_count, Some(2));
    assert_eq!(vars.nyuu_size, Some(3840));
    assert!(vars.rar_time.is_some() && vars.par_time.is_some() && vars.nyuu_time.is_some());

    assert!(task.nzb_file.exists());
    assert!(!task.rar_par_folder_path.exists());
    assert!(h.input().exists());

    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress(p) if p.task_id == queued.id && p.step == TaskStep::Upload
    )));

    let history = h.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, queued.id);
    assert_eq!(history[0].current_step, TaskStep::Finish);
    assert!(h.manager.is_idle());
}

#[tokio::test]
async fn skipped_archive_stage_spawns_nothing() {
    let h = Harness::new(FakeExecutor::default(), |_| {});
    let mut config = h.fresh();
    config.task_settings.rar_settings.skip_rar_creation = true;
    let queued = h.manager.queue_task_config(config);

    h.manager.tick_compression().unwrap().await.unwrap();

    assert!(h.executor.steps().is_empty());
    let task = h.manager.task(&queued.id).unwrap();
    assert_eq!(task.current_step, TaskStep::Protect);
    assert!(task.task_variables.rar_time.is_none());

    h.drain().await;
    assert_eq!(h.executor.steps(), vec![TaskStep::Protect, TaskStep::Upload]);
    let history = h.history();
    assert_eq!(history[0].current_step, TaskStep::Finish);
    // Raw inputs are posted next to the parity files.
    assert_eq!(history[0].task_variables.nyuu_files.len(), 4);
}

#[tokio::test]
async fn compression_respects_worker_limit() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeExecutor::gated(gate.clone()), |q| {
        q.max_compression_workers = 2;
        q.max_upload_queue_before_pause = 0;
    });
    for _ in 0..4 {
        h.manager.queue_task_config(h.fresh());
    }

    let first = h.manager.tick_compression().expect("first admission");
    assert_eq!(h.manager.queue_status().compression_running, 1);
    let second = h.manager.tick_compression().expect("second admission");
    assert!(h.manager.tick_compression().is_none());

    let status = h.manager.queue_status();
    assert_eq!(status.compression_running, 2);
    assert_eq!(status.compression_queued, 2);

    gate.add_permits(100);
    first.await.unwrap();
    second.await.unwrap();
    h.drain().await;

    assert!(h.executor.max_running.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.history().len(), 4);

    // Each task got its own working folder.
    let mut names: Vec<_> = h.history().into_iter().map(|t| t.rar_par_filename).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[tokio::test]
async fn upload_backlog_pauses_compression() {
    let h = Harness::new(FakeExecutor::default(), |q| {
        q.max_upload_queue_before_pause = 1;
    });
    let mut events = h.manager.subscribe();
    h.manager.pause_upload();

    let skip_all = |mut config: TaskConfig| {
        config.task_settings.rar_settings.skip_rar_creation = true;
        config.task_settings.par_settings.skip_par_creation = true;
        config
    };
    let a = h.manager.queue_task_config(skip_all(h.fresh()));
    let b = h.manager.queue_task_config(skip_all(h.fresh()));

    // Both skips of `a` run before `b` is looked at.
    h.manager.tick_compression().unwrap().await.unwrap();
    h.manager.tick_compression().unwrap().await.unwrap();
    assert_eq!(h.manager.all_tasks().upload.len(), 1);
    assert_eq!(h.manager.all_tasks().upload[0].id, a.id);

    assert!(h.manager.tick_compression().is_none());
    let status = h.manager.queue_status();
    assert!(status.compression_auto_paused);
    assert!(!status.compression_paused);
    assert!(status.compression_suspended);
    assert_eq!(h.manager.task(&b.id).unwrap().current_step, TaskStep::Compress);

    h.manager.resume_upload();
    h.manager.tick_upload().unwrap().await.unwrap();

    assert!(h.manager.tick_compression().is_some());
    assert!(!h.manager.queue_status().compression_auto_paused);

    let transitions: Vec<_> = collect(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::BackpressureChanged(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            BackpressureEvent::AutoPaused {
                upload_backlog: 1,
                threshold: 1
            },
            BackpressureEvent::AutoResumed { upload_backlog: 0 },
        ]
    );
}

#[tokio::test]
async fn resubmitting_a_running_task_keeps_its_progress() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeExecutor::gated(gate.clone()), |_| {});
    let queued = h.manager.queue_task_config(h.fresh());

    let handle = h.manager.tick_compression().unwrap();
    tokio::task::yield_now().await;

    let mut edited = h.manager.task(&queued.id).unwrap();
    edited.name = "Renamed".to_string();
    edited.task_settings.posting_settings.post_groups = "alt.binaries.misc".to_string();
    let merged = h.manager.queue_task_config(edited);
    assert!(merged.started);
    assert_eq!(merged.current_step, TaskStep::Compress);
    assert_eq!(h.manager.queue_status().compression_running, 1);

    gate.add_permits(100);
    handle.await.unwrap();

    let all = h.manager.all_tasks();
    assert_eq!(all.compression.len(), 1);
    let task = &all.compression[0];
    assert_eq!(task.current_step, TaskStep::Protect);
    assert!(task.rar_output.succeeded());
    assert_eq!(task.task_settings.posting_settings.post_groups, "alt.binaries.misc");
    assert_eq!(task.task_variables.rar_count, Some(2));
}

#[tokio::test]
async fn approval_gates_scheduling() {
    let h = Harness::new(FakeExecutor::default(), |_| {});
    let mut events = h.manager.subscribe();

    let staged = h.manager.add_approval_task(h.fresh());
    assert!(h.manager.tick_compression().is_none());
    assert!(h.manager.is_idle());

    let mut edited = staged.clone();
    edited.name = "Approved Name".to_string();
    h.manager.save_approval_task(edited).unwrap();
    assert_eq!(h.manager.approval_tasks()[0].name, "Approved Name");

    let rejected = h.manager.add_approval_task(h.fresh());
    h.manager.reject(&rejected.id).unwrap();

    let queued = h.manager.approve(&staged.id).unwrap();
    assert_eq!(queued.name, "Approved Name");
    assert!(h.manager.approval_tasks().is_empty());
    assert!(h.manager.approve(&staged.id).is_err());

    h.drain().await;
    let events = collect(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::ApprovalQueueChanged(list) if list.is_empty()
    )));
    assert_eq!(finished(&events)[0].name, "Approved Name");
}

#[tokio::test]
async fn queuing_an_approval_task_moves_it() {
    let h = Harness::new(FakeExecutor::default(), |_| {});
    let staged = h.manager.add_approval_task(h.fresh());

    h.manager.queue_task_config(staged.clone());

    assert!(h.manager.approval_tasks().is_empty());
    assert!(h.manager.task(&staged.id).is_some());
}

#[tokio::test]
async fn unqueued_running_task_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeExecutor::gated(gate.clone()), |_| {});
    let mut events = h.manager.subscribe();
    let queued = h.manager.queue_task_config(h.fresh());

    let handle = h.manager.tick_compression().unwrap();
    assert!(h.manager.unqueue(&queued.id));
    assert!(h.manager.is_idle());

    gate.add_permits(10);
    handle.await.unwrap();

    assert!(h.manager.is_idle());
    assert!(finished(&collect(&mut events)).is_empty());
    assert!(h.history().is_empty());
}

#[tokio::test]
async fn resubmitted_task_waits_for_its_unqueued_stage() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeExecutor::gated(gate.clone()), |q| {
        q.max_compression_workers = 4;
    });
    let queued = h.manager.queue_task_config(h.fresh());

    let stale = h.manager.tick_compression().unwrap();
    assert!(h.manager.unqueue(&queued.id));
    h.manager.queue_task_config(queued.clone());

    assert!(h.manager.tick_compression().is_none());
    assert_eq!(h.executor.calls.lock().len(), 1);

    gate.add_permits(100);
    stale.await.unwrap();

    // The old run's result never lands on the new entry.
    let status = h.manager.queue_status();
    assert_eq!(status.compression_running, 0);
    assert_eq!(status.compression_queued, 1);
    let pending = h.manager.task(&queued.id).unwrap();
    assert_eq!(pending.current_step, TaskStep::Compress);
    assert!(!pending.started);

    h.drain().await;

    assert_eq!(h.executor.max_running.load(Ordering::SeqCst), 1);
    let history = h.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].current_step, TaskStep::Finish);
}

#[tokio::test]
async fn cleared_running_task_is_not_readmitted_early() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeExecutor::gated(gate.clone()), |_| {});
    let queued = h.manager.queue_task_config(h.fresh());

    let stale = h.manager.tick_compression().unwrap();
    assert_eq!(h.manager.clear_all(), 1);
    h.manager.queue_task_config(queued.clone());
    assert!(h.manager.tick_compression().is_none());

    gate.add_permits(100);
    stale.await.unwrap();
    let fresh = h.manager.tick_compression().expect("admitted once the old stage returned");
    fresh.await.unwrap();
    assert_eq!(h.executor.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crashed_stage_finalizes_as_error() {
    let h = Harness::new(FakeExecutor::panicking_at(TaskStep::Protect), |_| {});
    let mut events = h.manager.subscribe();
    h.manager.queue_task_config(h.fresh());

    h.drain().await;

    let status = h.manager.queue_status();
    assert_eq!(status.compression_running, 0);
    let done = finished(&collect(&mut events));
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].current_step, TaskStep::Error);
    assert!(done[0].error.contains("Stage aborted"), "{}", done[0].error);
    assert_eq!(h.history()[0].current_step, TaskStep::Error);
}

#[tokio::test]
async fn failed_stage_finalizes_as_error() {
    let h = Harness::new(FakeExecutor::failing_at(TaskStep::Protect), |_| {});
    let mut events = h.manager.subscribe();
    let mut config = h.fresh();
    config.task_settings.posting_settings.delete_uploaded_files = true;
    h.manager.queue_task_config(config);

    h.drain().await;

    assert_eq!(h.executor.steps(), vec![TaskStep::Compress, TaskStep::Protect]);
    let done = finished(&collect(&mut events));
    assert_eq!(done.len(), 1);
    let task = &done[0];
    assert_eq!(task.current_step, TaskStep::Error);
    assert!(task.error.contains("boom"));
    assert!(task.rar_par_folder_path.exists());
    assert!(h.input().exists());
    assert_eq!(h.history()[0].current_step, TaskStep::Error);
}

#[tokio::test]
async fn unknown_server_fails_the_upload() {
    let h = Harness::new(FakeExecutor::default(), |_| {});
    let mut config = h.fresh();
    config.task_settings.server_id = "missing".to_string();
    h.manager.queue_task_config(config);

    h.drain().await;

    let history = h.history();
    assert_eq!(history[0].current_step, TaskStep::Error);
    assert!(history[0].error.contains("Server with ID missing not found"));
    assert_eq!(h.executor.steps(), vec![TaskStep::Compress, TaskStep::Protect]);
}

#[tokio::test]
async fn started_manager_drains_on_its_own() {
    let h = Harness::new(FakeExecutor::default(), |q| q.tick_interval_ms = 5);
    let mut events = h.manager.subscribe();
    let queued = h.manager.submit_files(None, vec![h.input()]);

    h.manager.start();
    let finished = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(PipelineEvent::TaskFinished(task)) => return *task,
                Some(_) => {}
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("task finished in time");
    h.manager.shutdown();

    assert_eq!(finished.id, queued.id);
    assert_eq!(finished.current_step, TaskStep::Finish);
}
