//! Notification bus between the pipeline and its observers.
//!
//! Publishing never blocks: with no subscribers the event is dropped, and a
//! subscriber that falls behind skips the events it missed.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::task::TaskConfig;

use super::backpressure::BackpressureEvent;
use super::progress::TaskProgress;
use super::status::QueueStatus;

/// Default buffer per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Progress(TaskProgress),
    QueueChanged(Box<QueueStatus>),
    /// A task reached FINISH or ERROR and was persisted.
    TaskFinished(Box<TaskConfig>),
    ApprovalQueueChanged(Vec<TaskConfig>),
    BackpressureChanged(BackpressureEvent),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        // Ignore errors - just means no subscribers currently
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A registered observer. Dropping it, or calling [`unsubscribe`], detaches it.
///
/// [`unsubscribe`]: EventSubscription::unsubscribe
pub struct EventSubscription {
    rx: broadcast::Receiver<PipelineEvent>,
}

impl EventSubscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
