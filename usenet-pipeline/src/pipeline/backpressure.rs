//! Upload backlog backpressure.
//!
//! Archiving and parity creation usually outpace posting. When too many
//! prepared tasks wait for an upload slot, the pre-upload queue stops
//! admitting work until the backlog drains.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Auto-pause transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackpressureEvent {
    /// The backlog reached the threshold; compression admission stops.
    AutoPaused {
        upload_backlog: usize,
        threshold: usize,
    },
    /// The backlog drained (or the limit was disabled); admission resumes.
    AutoResumed { upload_backlog: usize },
}

/// Tracks the auto-pause state of the pre-upload queue.
///
/// The auto-pause flag is independent from the operator's pause switch. An
/// operator resume releases it through [`release`]; the next check pauses
/// again if the backlog is still full.
///
/// [`release`]: BackpressureController::release
#[derive(Debug)]
pub struct BackpressureController {
    /// Backlog that triggers the pause. 0 disables backpressure.
    threshold: AtomicUsize,
    auto_paused: AtomicBool,
}

impl BackpressureController {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: AtomicUsize::new(threshold),
            auto_paused: AtomicBool::new(false),
        }
    }

    pub fn is_auto_paused(&self) -> bool {
        self.auto_paused.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::SeqCst)
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.store(threshold, Ordering::SeqCst);
    }

    /// Compare the number of not-yet-started upload tasks with the threshold.
    /// Returns `Some(event)` if the pause state flipped.
    pub fn check_and_update(&self, upload_backlog: usize) -> Option<BackpressureEvent> {
        let threshold = self.threshold();
        let paused = self.is_auto_paused();

        if paused && (threshold == 0 || upload_backlog < threshold) {
            self.auto_paused.store(false, Ordering::SeqCst);
            info!(
                upload_backlog,
                threshold, "Upload backlog drained, resuming compression queue"
            );
            return Some(BackpressureEvent::AutoResumed { upload_backlog });
        }

        if !paused && threshold > 0 && upload_backlog >= threshold {
            self.auto_paused.store(true, Ordering::SeqCst);
            warn!(
                upload_backlog,
                threshold, "Upload backlog full, pausing compression queue"
            );
            return Some(BackpressureEvent::AutoPaused {
                upload_backlog,
                threshold,
            });
        }

        None
    }

    /// Drop an active auto-pause regardless of the backlog.
    pub fn release(&self, upload_backlog: usize) -> Option<BackpressureEvent> {
        if self.auto_paused.swap(false, Ordering::SeqCst) {
            info!(upload_backlog, "Compression queue auto-pause released by resume");
            return Some(BackpressureEvent::AutoResumed { upload_backlog });
        }
        None
    }
}
