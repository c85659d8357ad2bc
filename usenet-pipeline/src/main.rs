use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use usenet_pipeline::config::AppConfig;
use usenet_pipeline::logging::init_logging;
use usenet_pipeline::pipeline::{PipelineEvent, TaskManager};
use usenet_pipeline::task::TaskStep;

/// Archive, protect and post files to Usenet.
#[derive(Debug, Parser)]
#[command(name = "usenet-pipeline", version, about)]
struct Cli {
    /// JSON configuration file. Defaults apply when it does not exist.
    #[arg(short, long, env = "USENET_PIPELINE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Profile to take task settings from.
    #[arg(short, long)]
    profile: Option<String>,

    /// Stage every task for approval and approve it right away.
    #[arg(long)]
    approve: bool,

    /// Files or folders to post, one task each.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn load_config(path: &Path) -> anyhow::Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        return Ok((config, true));
    }

    let mut config = AppConfig::default();
    config.apply_env_overrides();
    Ok((config, false))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (config, from_file) = load_config(&cli.config)?;
    config.validate()?;
    let _log_guard = init_logging(&config.logging)?;

    if !from_file {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let manager = Arc::new(TaskManager::with_defaults(Arc::new(config)));
    let mut events = manager.subscribe();

    let mut remaining = 0usize;
    for input in cli.inputs {
        let task = manager.fresh_task(cli.profile.as_deref(), vec![input]);
        let queued = if cli.approve {
            let staged = manager.add_approval_task(task);
            manager.approve(&staged.id)?
        } else {
            manager.queue_task_config(task)
        };
        info!(task_id = %queued.id, name = %queued.name, "Submitted task");
        remaining += 1;
    }

    manager.start();

    let mut failed = 0usize;
    while remaining > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping scheduler");
                break;
            }
            event = events.recv() => match event {
                Some(PipelineEvent::Progress(progress)) => {
                    println!(
                        "[{}] {} {:.2}%",
                        progress.task_id, progress.step, progress.percentage
                    );
                }
                Some(PipelineEvent::TaskFinished(task)) => {
                    remaining = remaining.saturating_sub(1);
                    if task.current_step == TaskStep::Error {
                        failed += 1;
                        error!(task_id = %task.id, name = %task.name, "Task failed: {}", task.error);
                    } else {
                        println!("{} -> {}", task.name, task.nzb_file.display());
                    }
                }
                Some(PipelineEvent::BackpressureChanged(event)) => {
                    info!(?event, "Backpressure changed");
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    manager.shutdown();

    if failed > 0 {
        anyhow::bail!("{failed} task(s) failed");
    }
    Ok(())
}
