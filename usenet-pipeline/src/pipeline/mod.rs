//! Queueing, scheduling and stage execution.

pub mod backpressure;
pub mod events;
pub mod manager;
pub mod progress;
pub mod record_reader;
pub mod runner;
pub mod stages;
pub mod status;

pub use backpressure::{BackpressureController, BackpressureEvent};
pub use events::{EventBus, EventSubscription, PipelineEvent};
pub use manager::TaskManager;
pub use progress::{ProgressReporter, TaskProgress};
pub use runner::{CommandExecutor, ProcessRunner};
pub use status::QueueStatus;
