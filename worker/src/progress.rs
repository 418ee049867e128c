//! Progress sinks for batch runs.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::profile::ProfileRequest;
use crate::transcoder::TaskOutcome;

/// Receives discrete progress notifications from a batch run.
///
/// For each task `on_task_start` arrives before `on_task_complete`, and the
/// fractions passed to `on_overall_progress` never decrease within one batch.
/// Implementations must tolerate calls from worker threads when the batch runs
/// with more than one worker.
pub trait ProgressReporter: Send + Sync {
    fn on_task_start(&self, profile: &ProfileRequest);
    fn on_task_complete(&self, profile: &ProfileRequest, outcome: &TaskOutcome);
    fn on_overall_progress(&self, fraction: f64);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_task_start(&self, _profile: &ProfileRequest) {}
    fn on_task_complete(&self, _profile: &ProfileRequest, _outcome: &TaskOutcome) {}
    fn on_overall_progress(&self, _fraction: f64) {}
}

/// Delivers every event to both reporters, first `A` then `B`.
impl<A: ProgressReporter, B: ProgressReporter> ProgressReporter for (A, B) {
    fn on_task_start(&self, profile: &ProfileRequest) {
        self.0.on_task_start(profile);
        self.1.on_task_start(profile);
    }

    fn on_task_complete(&self, profile: &ProfileRequest, outcome: &TaskOutcome) {
        self.0.on_task_complete(profile, outcome);
        self.1.on_task_complete(profile, outcome);
    }

    fn on_overall_progress(&self, fraction: f64) {
        self.0.on_overall_progress(fraction);
        self.1.on_overall_progress(fraction);
    }
}

/// Writes progress as log lines, prefixed with the job id.
#[derive(Debug, Clone)]
pub struct LogReporter {
    job_id: String,
}

impl LogReporter {
    pub fn new(job_id: impl Into<String>) -> Self {
        LogReporter { job_id: job_id.into() }
    }
}

impl ProgressReporter for LogReporter {
    fn on_task_start(&self, profile: &ProfileRequest) {
        info!("[Job {}] {}: 0%", self.job_id, profile);
    }

    fn on_task_complete(&self, profile: &ProfileRequest, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => info!("[Job {}] {}: 100%", self.job_id, profile),
            TaskOutcome::Failed(reason) => {
                warn!("[Job {}] {}: failed: {}", self.job_id, profile, reason)
            }
        }
    }

    fn on_overall_progress(&self, fraction: f64) {
        info!("[Job {}] overall progress {:.0}%", self.job_id, fraction * 100.0);
    }
}

/// Serializable form of a progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        profile: String,
    },
    TaskCompleted {
        profile: String,
        succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Overall {
        fraction: f64,
    },
}

/// Forwards events into a channel so an async task can publish them.
///
/// Sending never blocks; events sent after the receiver is dropped are lost.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        ChannelReporter { tx }
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            warn!("Progress receiver dropped; event discarded.");
        }
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_task_start(&self, profile: &ProfileRequest) {
        self.send(ProgressEvent::TaskStarted {
            profile: profile.to_string(),
        });
    }

    fn on_task_complete(&self, profile: &ProfileRequest, outcome: &TaskOutcome) {
        let reason = match outcome {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Failed(reason) => Some(reason.to_string()),
        };
        self.send(ProgressEvent::TaskCompleted {
            profile: profile.to_string(),
            succeeded: reason.is_none(),
            reason,
        });
    }

    fn on_overall_progress(&self, fraction: f64) {
        self.send(ProgressEvent::Overall { fraction });
    }
}
