//! Batch results and the response bodies built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::JobError;
use crate::profile::ProfileRequest;
use crate::transcoder::TaskStatus;

/// Outcome of one requested profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub profile: ProfileRequest,
    pub label: String,
    pub output_path: PathBuf,
    pub status: TaskStatus,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Per-profile outcomes of a batch, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResult {
    entries: Vec<TaskReport>,
}

impl JobResult {
    pub(crate) fn new(entries: Vec<TaskReport>) -> Self {
        JobResult { entries }
    }

    pub fn entries(&self) -> &[TaskReport] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&TaskReport> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(TaskReport::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.entries.iter().filter(|e| !e.succeeded())
    }

    /// Label to output path for every entry that succeeded.
    pub fn outputs(&self) -> BTreeMap<&str, &Path> {
        self.entries
            .iter()
            .filter(|e| e.succeeded())
            .map(|e| (e.label.as_str(), e.output_path.as_path()))
            .collect()
    }
}

/// Response body for a batch that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    pub message: String,
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl JobResponse {
    pub fn from_result(result: &JobResult) -> Self {
        let outputs = result
            .outputs()
            .into_iter()
            .map(|(label, path)| (label.to_string(), path.to_string_lossy().into_owned()))
            .collect();
        let failures: BTreeMap<String, String> = result
            .failures()
            .map(|e| {
                let reason = match &e.status {
                    TaskStatus::Failed(reason) => reason.to_string(),
                    other => format!("not completed ({:?})", other),
                };
                (e.label.clone(), reason)
            })
            .collect();
        let message = if failures.is_empty() {
            "Conversion completed successfully.".to_string()
        } else {
            format!(
                "Conversion finished with {} of {} profiles failed.",
                failures.len(),
                result.len()
            )
        };
        JobResponse {
            message,
            outputs,
            failures,
        }
    }

    /// 200 when every profile succeeded, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.failures.is_empty() { 200 } else { 500 }
    }
}

/// Response body for a batch rejected before or during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status_code: u16,
    pub detail: String,
}

impl From<&JobError> for ErrorResponse {
    fn from(err: &JobError) -> Self {
        ErrorResponse {
            status_code: err.status_code(),
            detail: err.to_string(),
        }
    }
}
