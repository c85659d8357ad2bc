//! Snapshot of both queues for display.

use serde::{Deserialize, Serialize};

use crate::task::TaskConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// The queue admits new stages: neither paused nor auto-paused.
    pub compression_active: bool,
    pub upload_active: bool,
    pub compression_running: usize,
    pub compression_running_configs: Vec<TaskConfig>,
    pub upload_running: usize,
    pub upload_running_configs: Vec<TaskConfig>,
    /// Entries not yet picked up.
    pub compression_queued: usize,
    pub compression_queued_configs: Vec<TaskConfig>,
    pub upload_queued: usize,
    pub upload_queued_configs: Vec<TaskConfig>,
    /// Operator pause of the pre-upload queue.
    pub compression_paused: bool,
    pub upload_paused: bool,
    /// Backpressure pause of the pre-upload queue.
    pub compression_auto_paused: bool,
    /// Either pause is in effect.
    pub compression_suspended: bool,
}
