//! Batch expansion and execution.
//!
//! A batch is validated completely before any encoder runs: the input must
//! exist, every profile must resolve, and no two profiles may share an output
//! name. Only then is the output directory created and the tasks executed, in
//! request order. Each task's failure is recorded in its own entry of the
//! [`JobResult`]; siblings keep running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use log::{debug, info, warn};

use crate::error::JobError;
use crate::manifest::{JobResult, TaskReport};
use crate::profile::{resolve_all, ProfileRequest};
use crate::progress::ProgressReporter;
use crate::transcoder::{EncodeTask, Encoder, TaskStatus};

/// What the batch does after a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and run the remaining tasks.
    #[default]
    Isolate,
    /// Stop scheduling new tasks and return [`JobError::EncodeFailure`].
    /// Tasks already running finish.
    AbortOnFirstFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Upper bound on concurrently running encodes. `1` runs tasks one after
    /// another on the calling thread.
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            max_parallel: 1,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

/// `<output_dir>/<input stem>_<tag>.<extension>`
pub fn output_path_for(input_path: &Path, output_dir: &Path, tag: &str, extension: &str) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}_{}.{}", stem, tag, extension))
}

pub struct BatchOrchestrator<E> {
    encoder: E,
    settings: BatchSettings,
}

impl<E: Encoder> BatchOrchestrator<E> {
    pub fn new(encoder: E) -> Self {
        Self::with_settings(encoder, BatchSettings::default())
    }

    pub fn with_settings(encoder: E, settings: BatchSettings) -> Self {
        BatchOrchestrator { encoder, settings }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Validates the request and expands it into pending tasks.
    ///
    /// Creating the output directory is the only side effect, and it happens
    /// after every other check has passed.
    pub fn plan(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profiles: &[ProfileRequest],
    ) -> Result<Vec<EncodeTask>, JobError> {
        if !input_path.is_file() {
            return Err(JobError::InputNotFound(input_path.to_path_buf()));
        }

        let resolved = resolve_all(profiles)?;

        let mut tags = HashSet::new();
        let mut labels = HashSet::new();
        for profile in &resolved {
            if !tags.insert(profile.tag.as_str()) || !labels.insert(profile.label.as_str()) {
                return Err(JobError::DuplicateProfile(profile.label.clone()));
            }
        }

        // Succeeds for an existing directory and fails for any other file.
        let existed = output_dir.is_dir();
        std::fs::create_dir_all(output_dir).map_err(|source| JobError::OutputDirCreateFailure {
            path: output_dir.to_path_buf(),
            source,
        })?;
        if !existed {
            info!("Created output directory: {:?}", output_dir);
        }

        Ok(resolved
            .into_iter()
            .map(|profile| {
                let output_path =
                    output_path_for(input_path, output_dir, &profile.tag, &profile.spec.output_extension);
                EncodeTask::new(
                    profile.request,
                    profile.label,
                    input_path.to_path_buf(),
                    output_path,
                    profile.spec,
                )
            })
            .collect())
    }

    /// Runs every requested profile and returns one entry per profile, in
    /// request order.
    pub fn run_batch(
        &self,
        input_path: &Path,
        output_dir: &Path,
        profiles: &[ProfileRequest],
        reporter: &dyn ProgressReporter,
    ) -> Result<JobResult, JobError> {
        let tasks = self.plan(input_path, output_dir, profiles)?;
        info!(
            "Running {} encode task(s) for {:?} into {:?}",
            tasks.len(),
            input_path,
            output_dir
        );
        let tasks = self.execute(tasks, reporter);

        if self.settings.failure_policy == FailurePolicy::AbortOnFirstFailure {
            let first_failure = tasks.iter().find_map(|t| match &t.status {
                TaskStatus::Failed(reason) => Some((t.label.clone(), reason.to_string())),
                _ => None,
            });
            if let Some((profile, diagnostic)) = first_failure {
                warn!("Aborting batch after failed profile {}", profile);
                return Err(JobError::EncodeFailure { profile, diagnostic });
            }
        }

        let result = JobResult::new(
            tasks
                .into_iter()
                .map(|t| TaskReport {
                    profile: t.profile,
                    label: t.label,
                    output_path: t.output_path,
                    status: t.status,
                })
                .collect(),
        );
        info!(
            "Batch finished: {} succeeded, {} failed",
            result.len() - result.failures().count(),
            result.failures().count()
        );
        Ok(result)
    }

    fn execute(&self, tasks: Vec<EncodeTask>, reporter: &dyn ProgressReporter) -> Vec<EncodeTask> {
        let total = tasks.len();
        if total == 0 {
            return tasks;
        }

        let run = Run {
            encoder: &self.encoder,
            policy: self.settings.failure_policy,
            reporter,
            slots: tasks.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            completed: Mutex::new(0),
        };

        reporter.on_overall_progress(0.0);
        let workers = self.settings.max_parallel.clamp(1, total);
        if workers == 1 {
            run.work();
        } else {
            debug!("Dispatching {} tasks across {} workers", total, workers);
            thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| run.work());
                }
            });
        }

        run.slots
            .into_iter()
            .map(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}

/// Shared state of one batch execution.
struct Run<'a> {
    encoder: &'a dyn Encoder,
    policy: FailurePolicy,
    reporter: &'a dyn ProgressReporter,
    slots: Vec<Mutex<EncodeTask>>,
    next: AtomicUsize,
    aborted: AtomicBool,
    completed: Mutex<usize>,
}

impl Run<'_> {
    /// Claims tasks in request order until none are left.
    fn work(&self) {
        while !self.aborted.load(Ordering::Acquire) {
            let index = self.next.fetch_add(1, Ordering::AcqRel);
            let Some(slot) = self.slots.get(index) else {
                break;
            };
            let mut task = slot.lock().unwrap_or_else(PoisonError::into_inner);

            self.reporter.on_task_start(&task.profile);
            let outcome = task.execute(self.encoder);
            self.reporter.on_task_complete(&task.profile, &outcome);

            if !outcome.is_success() && self.policy == FailurePolicy::AbortOnFirstFailure {
                self.aborted.store(true, Ordering::Release);
            }
            drop(task);
            self.complete_one();
        }
    }

    // Counted and reported under one lock so fractions arrive in order.
    fn complete_one(&self) {
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        *completed += 1;
        self.reporter
            .on_overall_progress(*completed as f64 / self.slots.len() as f64);
    }
}
