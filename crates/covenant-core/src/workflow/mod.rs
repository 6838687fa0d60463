//! Workflow controller for contract analysis.
//!
//! # Architecture
//!
//! ```text
//!  start(contract)
//!       │
//!       ▼
//! ┌───────────────┐   ┌───────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ text_extraction│──▶│ ai_extraction │──▶│ risk_analysis │──▶│compliance_check│──▶ Ready
//! │ start + poll   │   │ start + poll  │   │ one request   │   │ start (+ poll) │
//! └───────────────┘   └───────────────┘   └───────────────┘   └────────────────┘
//!         │ failed / timed out: stop and wait for retry or check_again
//! ```
//!
//! Each phase runs as one task owning a child token of its contract's token.
//! Tasks report back through the controller, which is the only writer to the
//! [`JobStore`]. Releasing a contract cancels its token, which aborts in-flight
//! requests and pending poll ticks, then clears its jobs.

mod events;
mod phase;
mod remote;

pub use events::{ChannelEmitter, NoOpEmitter, WorkflowEmitter, WorkflowEvent};
pub use phase::{derive_phase, PhaseStatus, WorkflowPhase};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ContractApi};
use crate::jobs::{ApplyOutcome, Job, JobKey, JobKind, JobStatus, JobStore};
use crate::poller::{PollConfig, PollOutcome, Poller, QueryError};

use remote::{RemoteReport, StartAck};

/// Controller settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Polling policy shared by every phase
    pub poll: PollConfig,
    /// Start the next phase as soon as the previous one completes
    pub auto_advance: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            auto_advance: true,
        }
    }
}

/// Errors returned to the operator.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{kind} cannot start until {requires} has completed")]
    PrerequisiteNotMet { kind: JobKind, requires: JobKind },
    #[error("{kind} for {subject_id} has not timed out")]
    NotTimedOut { subject_id: String, kind: JobKind },
    #[error("Workflow controller has shut down")]
    ShutDown,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A new job was started.
    Started(Job),
    /// The phase was already running; nothing was started.
    AlreadyRunning(Job),
}

impl StartOutcome {
    pub fn job(&self) -> &Job {
        match self {
            StartOutcome::Started(job) | StartOutcome::AlreadyRunning(job) => job,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskMode {
    /// Send the start request, then poll.
    Start,
    /// Poll an existing remote job.
    Resume,
}

/// What one status report did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Running,
    Finished(JobStatus),
    /// The job was restarted or cleared under us.
    Superseded,
}

struct PhaseTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PhaseTask {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

struct State {
    store: JobStore,
    tasks: HashMap<JobKey, PhaseTask>,
    subjects: HashMap<String, CancellationToken>,
    timed_out: HashSet<JobKey>,
    last_phase: HashMap<String, WorkflowPhase>,
}

impl State {
    fn phase_status(&self, subject_id: &str, kind: JobKind) -> PhaseStatus {
        let timed_out = self.timed_out.contains(&JobKey::new(subject_id, kind));
        PhaseStatus::from_job(self.store.get(subject_id, kind), timed_out)
    }

    fn phase(&self, subject_id: &str) -> WorkflowPhase {
        derive_phase(|kind| self.phase_status(subject_id, kind))
    }

    /// A `PhaseChanged` event if the phase moved since the last one emitted.
    fn phase_event(&mut self, subject_id: &str) -> Option<WorkflowEvent> {
        let phase = self.phase(subject_id);
        if self.last_phase.get(subject_id) == Some(&phase) {
            return None;
        }
        self.last_phase.insert(subject_id.to_string(), phase.clone());
        Some(WorkflowEvent::PhaseChanged {
            subject_id: subject_id.to_string(),
            phase,
        })
    }

    /// Pending or processing, and polling hasn't given up.
    fn in_flight(&self, key: &JobKey) -> bool {
        self.store.is_active(&key.subject_id, key.kind) && !self.timed_out.contains(key)
    }
}

struct Inner {
    api: Arc<dyn ContractApi>,
    state: Mutex<State>,
    config: WorkflowConfig,
    emitter: Arc<dyn WorkflowEmitter>,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sequences extraction, AI analysis, risk analysis and compliance checking
/// for any number of contracts.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowController {
    inner: Arc<Inner>,
}

impl WorkflowController {
    /// Create a controller that owns `store`.
    pub fn new(
        api: Arc<dyn ContractApi>,
        store: JobStore,
        config: WorkflowConfig,
        emitter: Arc<dyn WorkflowEmitter>,
    ) -> Self {
        let state = State {
            store,
            tasks: HashMap::new(),
            subjects: HashMap::new(),
            timed_out: HashSet::new(),
            last_phase: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                api,
                state: Mutex::new(state),
                config,
                emitter,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    /// Begin the workflow with text extraction.
    pub async fn start(&self, subject_id: &str) -> Result<StartOutcome, WorkflowError> {
        self.start_phase(subject_id, JobKind::TextExtraction).await
    }

    /// Start one phase.
    ///
    /// A no-op returning [`StartOutcome::AlreadyRunning`] while the phase's
    /// job is pending or processing. Fails if the previous phase hasn't
    /// completed. Restarting a finished or timed-out phase supersedes the old
    /// job.
    pub async fn start_phase(
        &self,
        subject_id: &str,
        kind: JobKind,
    ) -> Result<StartOutcome, WorkflowError> {
        if self.inner.cancel.is_cancelled() {
            return Err(WorkflowError::ShutDown);
        }

        let key = JobKey::new(subject_id, kind);
        let mut events = Vec::new();

        let job = {
            let mut state = self.inner.state.lock().await;

            if state.in_flight(&key) {
                if let Some(job) = state.store.get(subject_id, kind) {
                    tracing::debug!(subject_id, %kind, "Phase already running");
                    return Ok(StartOutcome::AlreadyRunning(job.clone()));
                }
            }

            if let Some(requires) = kind.prerequisite() {
                if state.store.status(subject_id, requires) != JobStatus::Completed {
                    return Err(WorkflowError::PrerequisiteNotMet { kind, requires });
                }
            }

            let job = state.store.start_job(subject_id, kind);
            state.timed_out.remove(&key);
            self.spawn_task(&mut state, key, job.generation, TaskMode::Start);

            events.push(WorkflowEvent::JobUpdated { job: job.clone() });
            events.extend(state.phase_event(subject_id));
            job
        };

        tracing::info!(subject_id, %kind, generation = job.generation, "Phase started");
        self.emit_all(events);
        Ok(StartOutcome::Started(job))
    }

    /// Re-trigger a phase after a failure.
    pub async fn retry(
        &self,
        subject_id: &str,
        kind: JobKind,
    ) -> Result<StartOutcome, WorkflowError> {
        self.start_phase(subject_id, kind).await
    }

    /// Resume polling a timed-out phase without re-triggering the remote job.
    pub async fn check_again(&self, subject_id: &str, kind: JobKind) -> Result<Job, WorkflowError> {
        let key = JobKey::new(subject_id, kind);
        let not_timed_out = || WorkflowError::NotTimedOut {
            subject_id: subject_id.to_string(),
            kind,
        };

        let (job, events) = {
            let mut state = self.inner.state.lock().await;
            if !state.timed_out.contains(&key) {
                return Err(not_timed_out());
            }
            let Some(job) = state.store.get(subject_id, kind).cloned() else {
                return Err(not_timed_out());
            };

            state.timed_out.remove(&key);
            self.spawn_task(&mut state, key, job.generation, TaskMode::Resume);
            let events: Vec<_> = state.phase_event(subject_id).into_iter().collect();
            (job, events)
        };

        tracing::info!(subject_id, %kind, "Checking timed-out phase again");
        self.emit_all(events);
        Ok(job)
    }

    /// Reconcile local state with the service's latest results.
    ///
    /// Completed results are adopted, in-flight jobs get a poller, and a 404
    /// leaves the phase not started. Risk analysis has no read endpoint and is
    /// left as is. Phases still being polled are skipped.
    pub async fn hydrate(&self, subject_id: &str) -> Result<WorkflowPhase, WorkflowError> {
        if self.inner.cancel.is_cancelled() {
            return Err(WorkflowError::ShutDown);
        }

        for kind in [
            JobKind::TextExtraction,
            JobKind::AiExtraction,
            JobKind::ComplianceCheck,
        ] {
            if self.is_in_flight(subject_id, kind).await {
                continue;
            }
            match remote::fetch_status(self.inner.api.as_ref(), subject_id, kind).await {
                Ok(report) => self.adopt(subject_id, kind, report).await,
                Err(e) if e.is_not_found() => self.forget(subject_id, kind).await,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.phase(subject_id).await)
    }

    /// Stop all work for a contract and drop its state.
    ///
    /// Returns the number of tasks that were still running.
    pub async fn release(&self, subject_id: &str) -> usize {
        let mut state = self.inner.state.lock().await;

        if let Some(token) = state.subjects.remove(subject_id) {
            token.cancel();
        }

        let keys: Vec<JobKey> = state
            .tasks
            .keys()
            .filter(|k| k.subject_id == subject_id)
            .cloned()
            .collect();
        let mut stopped = 0;
        for key in keys {
            if let Some(task) = state.tasks.remove(&key) {
                if task.is_running() {
                    stopped += 1;
                }
                task.stop();
            }
        }

        state.timed_out.retain(|k| k.subject_id != subject_id);
        state.last_phase.remove(subject_id);
        let cleared = state.store.clear(subject_id, None);

        tracing::info!(subject_id, stopped, cleared, "Released contract");
        stopped
    }

    /// Stop all work for every contract. Further starts fail.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut state = self.inner.state.lock().await;
        for (_, task) in state.tasks.drain() {
            task.stop();
        }
        state.subjects.clear();
        tracing::info!("Workflow controller shut down");
    }

    pub async fn phase(&self, subject_id: &str) -> WorkflowPhase {
        self.inner.state.lock().await.phase(subject_id)
    }

    pub async fn phase_status(&self, subject_id: &str, kind: JobKind) -> PhaseStatus {
        self.inner.state.lock().await.phase_status(subject_id, kind)
    }

    pub async fn job(&self, subject_id: &str, kind: JobKind) -> Option<Job> {
        self.inner
            .state
            .lock()
            .await
            .store
            .get(subject_id, kind)
            .cloned()
    }

    /// Every job of a contract, in workflow order.
    pub async fn snapshot(&self, subject_id: &str) -> Vec<Job> {
        self.inner.state.lock().await.store.jobs_for(subject_id)
    }

    /// Number of live phase tasks for a contract.
    pub async fn active_tasks(&self, subject_id: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|(k, t)| k.subject_id == subject_id && t.is_running())
            .count()
    }

    async fn is_in_flight(&self, subject_id: &str, kind: JobKind) -> bool {
        let state = self.inner.state.lock().await;
        state.in_flight(&JobKey::new(subject_id, kind))
    }

    fn spawn_task(&self, state: &mut State, key: JobKey, generation: u64, mode: TaskMode) {
        let subject_token = state
            .subjects
            .entry(key.subject_id.clone())
            .or_insert_with(|| self.inner.cancel.child_token())
            .clone();
        let cancel = subject_token.child_token();

        let task = tokio::spawn(self.clone().run_phase(
            key.subject_id.clone(),
            key.kind,
            generation,
            mode,
            cancel.clone(),
        ));

        if let Some(previous) = state.tasks.insert(key, PhaseTask { cancel, task }) {
            previous.stop();
        }
    }

    /// Body of a phase task.
    fn run_phase(
        self,
        subject_id: String,
        kind: JobKind,
        generation: u64,
        mode: TaskMode,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        async move {
            tracing::debug!(subject_id = %subject_id, %kind, generation, ?mode, "Phase task started");

            if mode == TaskMode::Start {
                let started = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    started = remote::start(self.inner.api.as_ref(), &subject_id, kind) => started,
                };

                match started {
                    Ok(StartAck::Poll) => {}
                    Ok(StartAck::Finished(report)) => {
                        let progress = self
                            .record_report(&subject_id, kind, generation, &report)
                            .await;
                        self.finish(&subject_id, kind, progress, &cancel).await;
                        return;
                    }
                    Err(e) => {
                        tracing::error!(subject_id = %subject_id, %kind, error = %e, "Start request failed");
                        self.fail_job(&subject_id, kind, generation, e.to_string())
                            .await;
                        return;
                    }
                }
            }

            match self.poll(&subject_id, kind, generation, &cancel).await {
                PollOutcome::Terminal(progress) => {
                    self.finish(&subject_id, kind, progress, &cancel).await
                }
                PollOutcome::TimedOut {
                    attempts,
                    last_error,
                } => {
                    self.time_out(&subject_id, kind, generation, attempts, last_error)
                        .await
                }
                PollOutcome::Aborted(e) => {
                    tracing::error!(subject_id = %subject_id, %kind, error = %e, "Polling aborted");
                    self.fail_job(&subject_id, kind, generation, e.to_string())
                        .await;
                }
                PollOutcome::Crashed(message) => {
                    tracing::error!(subject_id = %subject_id, %kind, error = %message, "Polling crashed");
                    self.fail_job(&subject_id, kind, generation, message).await;
                }
                PollOutcome::Stopped => {
                    tracing::debug!(subject_id = %subject_id, %kind, "Polling stopped")
                }
            }
        }
        .boxed()
    }

    async fn poll(
        &self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        cancel: &CancellationToken,
    ) -> PollOutcome<Progress, ApiError> {
        let poller = Poller::new(self.inner.config.poll.clone(), |p: &Progress| {
            *p != Progress::Running
        });

        let controller = self.clone();
        let subject = subject_id.to_string();
        let handle = poller.start_with_token(cancel.child_token(), move || {
            let controller = controller.clone();
            let subject = subject.clone();
            async move { controller.poll_once(&subject, kind, generation).await }
        });

        handle.outcome().await
    }

    async fn poll_once(
        &self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
    ) -> Result<Progress, QueryError<ApiError>> {
        match remote::fetch_status(self.inner.api.as_ref(), subject_id, kind).await {
            Ok(report) => Ok(self.record_report(subject_id, kind, generation, &report).await),
            Err(e) => {
                let progress = self
                    .record_poll_error(subject_id, kind, generation, &e)
                    .await;
                if progress == Progress::Superseded {
                    return Ok(Progress::Superseded);
                }
                if remote::is_fatal(kind, &e) {
                    Err(QueryError::Fatal(e))
                } else {
                    tracing::warn!(subject_id, %kind, error = %e, "Status poll failed");
                    Err(QueryError::Transient(e))
                }
            }
        }
    }

    async fn record_report(
        &self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        report: &RemoteReport,
    ) -> Progress {
        let mut events = Vec::new();
        let progress = {
            let mut state = self.inner.state.lock().await;
            let outcome = state.store.apply_poll_result(
                subject_id,
                kind,
                generation,
                &report.status,
                Some(report.payload.clone()),
                report.error.clone(),
            );
            match outcome {
                ApplyOutcome::Applied(job) => {
                    let progress = if job.status.is_terminal() {
                        Progress::Finished(job.status)
                    } else {
                        Progress::Running
                    };
                    events.push(WorkflowEvent::JobUpdated { job });
                    events.extend(state.phase_event(subject_id));
                    progress
                }
                ApplyOutcome::Stale | ApplyOutcome::AlreadyTerminal | ApplyOutcome::Missing => {
                    Progress::Superseded
                }
            }
        };
        self.emit_all(events);
        progress
    }

    async fn record_poll_error(
        &self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        err: &ApiError,
    ) -> Progress {
        let mut events = Vec::new();
        let progress = {
            let mut state = self.inner.state.lock().await;
            match state
                .store
                .record_poll_error(subject_id, kind, generation, err.to_string())
            {
                ApplyOutcome::Applied(job) => {
                    events.push(WorkflowEvent::JobUpdated { job });
                    Progress::Running
                }
                _ => Progress::Superseded,
            }
        };
        self.emit_all(events);
        progress
    }

    async fn fail_job(&self, subject_id: &str, kind: JobKind, generation: u64, message: String) {
        let report = RemoteReport {
            status: "failed".to_string(),
            payload: serde_json::Value::Null,
            error: Some(message),
        };
        self.record_report(subject_id, kind, generation, &report)
            .await;
    }

    async fn finish(
        &self,
        subject_id: &str,
        kind: JobKind,
        progress: Progress,
        cancel: &CancellationToken,
    ) {
        match progress {
            Progress::Finished(JobStatus::Completed) => {
                tracing::info!(subject_id, %kind, "Phase completed");
                self.advance(subject_id, kind, cancel).await;
            }
            Progress::Finished(status) => {
                tracing::warn!(subject_id, %kind, %status, "Phase failed");
            }
            Progress::Running | Progress::Superseded => {
                tracing::debug!(subject_id, %kind, "Phase superseded");
            }
        }
    }

    async fn advance(&self, subject_id: &str, kind: JobKind, cancel: &CancellationToken) {
        if !self.inner.config.auto_advance || cancel.is_cancelled() {
            return;
        }
        let Some(next) = kind.next() else {
            tracing::info!(subject_id, "Workflow ready");
            return;
        };
        if let Err(e) = self.start_phase(subject_id, next).await {
            tracing::warn!(subject_id, %next, error = %e, "Could not advance workflow");
        }
    }

    async fn time_out(
        &self,
        subject_id: &str,
        kind: JobKind,
        generation: u64,
        attempts: u32,
        last_error: Option<ApiError>,
    ) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            let current = state
                .store
                .get(subject_id, kind)
                .is_some_and(|j| j.generation == generation && j.status.is_active());
            if !current {
                return;
            }
            state.timed_out.insert(JobKey::new(subject_id, kind));
            events.push(WorkflowEvent::PollingTimedOut {
                subject_id: subject_id.to_string(),
                kind,
                attempts,
            });
            events.extend(state.phase_event(subject_id));
        }

        tracing::warn!(
            subject_id,
            %kind,
            attempts,
            last_error = ?last_error,
            "Polling timed out"
        );
        self.emit_all(events);
    }

    /// Seed the store from a status fetched out of band.
    async fn adopt(&self, subject_id: &str, kind: JobKind, report: RemoteReport) {
        let key = JobKey::new(subject_id, kind);
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            let job = match report.local_status() {
                Some(JobStatus::Completed) => {
                    state
                        .store
                        .record_completed(subject_id, kind, report.payload)
                }
                Some(JobStatus::Failed) => {
                    let job = state.store.start_job(subject_id, kind);
                    match state.store.apply_poll_result(
                        subject_id,
                        kind,
                        job.generation,
                        &report.status,
                        None,
                        report.error,
                    ) {
                        ApplyOutcome::Applied(job) => job,
                        _ => job,
                    }
                }
                _ => {
                    let job = state.store.start_job(subject_id, kind);
                    self.spawn_task(&mut state, key.clone(), job.generation, TaskMode::Resume);
                    job
                }
            };
            state.timed_out.remove(&key);
            tracing::debug!(subject_id, %kind, status = %job.status, "Adopted remote state");
            events.push(WorkflowEvent::JobUpdated { job });
            events.extend(state.phase_event(subject_id));
        }
        self.emit_all(events);
    }

    /// Drop local state for a phase the service has no record of.
    async fn forget(&self, subject_id: &str, kind: JobKind) {
        let events: Vec<_> = {
            let mut state = self.inner.state.lock().await;
            state.store.clear(subject_id, Some(kind));
            state.timed_out.remove(&JobKey::new(subject_id, kind));
            state.phase_event(subject_id).into_iter().collect()
        };
        self.emit_all(events);
    }

    fn emit_all(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.inner.emitter.emit(event);
        }
    }
}
