//! Job state store.
//!
//! Holds one [`Job`] per `(subject_id, kind)` and exposes synchronous
//! transitions. The store does no I/O; the workflow controller owns it and
//! is its only writer.
//!
//! # Generations
//!
//! Every `start_job` takes a fresh number from a store-wide counter. Poll
//! responses are applied with the generation they were issued under, and any
//! response whose generation differs from the job's current one is dropped.
//! The counter is never reset, so a response that was in flight across a
//! `clear` + `start_job` can't match the new job either.

mod types;

pub use types::{ApplyOutcome, Job, JobKey, JobKind, JobStatus};

use std::collections::HashMap;

use chrono::Utc;

/// In-memory job state for all subjects.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobKey, Job>,
    next_generation: u64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a job.
    ///
    /// Overwrites any previous state for the key, including a terminal one.
    pub fn start_job(&mut self, subject_id: &str, kind: JobKind) -> Job {
        self.next_generation += 1;
        let job = Job {
            subject_id: subject_id.to_string(),
            kind,
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            attempts: 0,
            last_poll_error: None,
            started_at: Utc::now(),
            last_polled_at: None,
            generation: self.next_generation,
        };
        self.jobs.insert(JobKey::new(subject_id, kind), job.clone());
        job
    }

    /// Apply a status report from the service.
    ///
    /// Unknown status words are treated as `processing` so a vocabulary change
    /// on the server side keeps the job polling rather than failing it.
    pub fn apply_poll_result(
        &mut self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        remote_status: &str,
        payload: Option<serde_json::Value>,
        error: Option<String>,
    ) -> ApplyOutcome {
        let Some(job) = self.jobs.get_mut(&JobKey::new(subject_id, kind)) else {
            return ApplyOutcome::Missing;
        };
        if job.generation != generation {
            tracing::debug!(
                subject_id,
                %kind,
                generation,
                current = job.generation,
                "Dropping stale poll response"
            );
            return ApplyOutcome::Stale;
        }
        if job.status.is_terminal() {
            return ApplyOutcome::AlreadyTerminal;
        }

        let status = JobStatus::from_remote(remote_status).unwrap_or_else(|| {
            tracing::warn!(subject_id, %kind, remote_status, "Unknown job status, treating as processing");
            JobStatus::Processing
        });

        job.attempts += 1;
        job.last_polled_at = Some(Utc::now());
        job.last_poll_error = None;

        match status {
            JobStatus::Completed => {
                job.status = JobStatus::Completed;
                job.result = payload;
            }
            JobStatus::Failed => {
                job.status = JobStatus::Failed;
                job.error_message =
                    Some(error.unwrap_or_else(|| format!("{} failed", kind_label(kind))));
            }
            JobStatus::Pending | JobStatus::Processing => {
                job.status = status;
            }
            JobStatus::Idle => {}
        }

        ApplyOutcome::Applied(job.clone())
    }

    /// Record a status poll that got no usable answer.
    ///
    /// Counts as an attempt but leaves the status alone.
    pub fn record_poll_error(
        &mut self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        message: impl Into<String>,
    ) -> ApplyOutcome {
        let Some(job) = self.jobs.get_mut(&JobKey::new(subject_id, kind)) else {
            return ApplyOutcome::Missing;
        };
        if job.generation != generation {
            return ApplyOutcome::Stale;
        }
        if job.status.is_terminal() {
            return ApplyOutcome::AlreadyTerminal;
        }

        job.attempts += 1;
        job.last_polled_at = Some(Utc::now());
        job.last_poll_error = Some(message.into());
        ApplyOutcome::Applied(job.clone())
    }

    /// Seed a completed job from an authoritative result fetched out of band.
    pub fn record_completed(
        &mut self,
        subject_id: &str,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Job {
        let job = self.start_job(subject_id, kind);
        match self.apply_poll_result(
            subject_id,
            kind,
            job.generation,
            "completed",
            Some(payload),
            None,
        ) {
            ApplyOutcome::Applied(job) => job,
            _ => job,
        }
    }

    /// Remove job state for a subject; all kinds when `kind` is `None`.
    ///
    /// Returns the number of jobs removed.
    pub fn clear(&mut self, subject_id: &str, kind: Option<JobKind>) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|key, _| key.subject_id != subject_id || kind.is_some_and(|k| k != key.kind));
        before - self.jobs.len()
    }

    pub fn get(&self, subject_id: &str, kind: JobKind) -> Option<&Job> {
        self.jobs.get(&JobKey::new(subject_id, kind))
    }

    pub fn status(&self, subject_id: &str, kind: JobKind) -> JobStatus {
        self.get(subject_id, kind)
            .map(|j| j.status)
            .unwrap_or(JobStatus::Idle)
    }

    /// Pending or processing.
    pub fn is_active(&self, subject_id: &str, kind: JobKind) -> bool {
        self.status(subject_id, kind).is_active()
    }

    /// All jobs for a subject, in workflow order.
    pub fn jobs_for(&self, subject_id: &str) -> Vec<Job> {
        JobKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(subject_id, kind).cloned())
            .collect()
    }
}

fn kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::TextExtraction => "Text extraction",
        JobKind::AiExtraction => "AI extraction",
        JobKind::RiskAnalysis => "Risk analysis",
        JobKind::ComplianceCheck => "Compliance check",
    }
}
