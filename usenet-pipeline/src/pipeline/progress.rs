use serde::{Deserialize, Serialize};

use crate::task::TaskStep;

use super::events::{EventBus, PipelineEvent};

/// Progress of a running stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub step: TaskStep,
    pub percentage: f64,
}

/// Publishes progress for one task stage without ever blocking the reader.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: String,
    step: TaskStep,
    events: EventBus,
}

impl ProgressReporter {
    pub fn new(task_id: impl Into<String>, step: TaskStep, events: EventBus) -> Self {
        Self {
            task_id: task_id.into(),
            step,
            events,
        }
    }

    pub fn noop(task_id: impl Into<String>, step: TaskStep) -> Self {
        Self::new(task_id, step, EventBus::new(1))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn step(&self) -> TaskStep {
        self.step
    }

    pub fn report(&self, percentage: f64) {
        self.events.publish(PipelineEvent::Progress(TaskProgress {
            task_id: self.task_id.clone(),
            step: self.step,
            percentage,
        }));
    }
}
