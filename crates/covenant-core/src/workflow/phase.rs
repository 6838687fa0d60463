//! Phase view derived from job state.

use serde::{Deserialize, Serialize};

use crate::jobs::{Job, JobKind, JobStatus};

/// Where a contract is in the analysis workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkflowPhase {
    NotStarted,
    Extracting,
    AwaitingAiAnalysis,
    AnalyzingRisk,
    AwaitingComplianceCheck,
    Ready,
    /// A job reported failure; auto-progression stops here until a retry.
    Failed { kind: JobKind, message: String },
    /// Polling ran out of attempts; the remote job may still finish.
    TimedOut { kind: JobKind },
}

impl WorkflowPhase {
    /// The phase shown while a job of `kind` is outstanding.
    pub fn running(kind: JobKind) -> Self {
        match kind {
            JobKind::TextExtraction => WorkflowPhase::Extracting,
            JobKind::AiExtraction => WorkflowPhase::AwaitingAiAnalysis,
            JobKind::RiskAnalysis => WorkflowPhase::AnalyzingRisk,
            JobKind::ComplianceCheck => WorkflowPhase::AwaitingComplianceCheck,
        }
    }

    /// Ready, failed and timed out phases need an operator or a new start.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            WorkflowPhase::Ready | WorkflowPhase::Failed { .. } | WorkflowPhase::TimedOut { .. }
        )
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowPhase::NotStarted => write!(f, "not started"),
            WorkflowPhase::Extracting => write!(f, "extracting text"),
            WorkflowPhase::AwaitingAiAnalysis => write!(f, "awaiting AI analysis"),
            WorkflowPhase::AnalyzingRisk => write!(f, "analyzing risk"),
            WorkflowPhase::AwaitingComplianceCheck => write!(f, "awaiting compliance check"),
            WorkflowPhase::Ready => write!(f, "ready"),
            WorkflowPhase::Failed { kind, message } => write!(f, "{} failed: {}", kind, message),
            WorkflowPhase::TimedOut { kind } => write!(f, "{} timed out", kind),
        }
    }
}

/// Status of a single phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Running { attempts: u32 },
    Completed,
    Failed { message: String },
    TimedOut { attempts: u32 },
}

impl PhaseStatus {
    pub fn from_job(job: Option<&Job>, timed_out: bool) -> Self {
        let Some(job) = job else {
            return PhaseStatus::NotStarted;
        };
        match job.status {
            JobStatus::Idle => PhaseStatus::NotStarted,
            JobStatus::Pending | JobStatus::Processing if timed_out => PhaseStatus::TimedOut {
                attempts: job.attempts,
            },
            JobStatus::Pending | JobStatus::Processing => PhaseStatus::Running {
                attempts: job.attempts,
            },
            JobStatus::Completed => PhaseStatus::Completed,
            JobStatus::Failed => PhaseStatus::Failed {
                message: job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
        }
    }
}

/// Fold per-kind statuses into the overall phase.
///
/// Kinds are walked in workflow order; the first one that isn't completed
/// decides the phase. A kind with no record counts as done when a later kind
/// has completed, since risk analysis can't be read back from the service.
pub fn derive_phase(status_of: impl Fn(JobKind) -> PhaseStatus) -> WorkflowPhase {
    let statuses: Vec<(JobKind, PhaseStatus)> = JobKind::ALL
        .into_iter()
        .map(|kind| (kind, status_of(kind)))
        .collect();
    let reached = statuses
        .iter()
        .rposition(|(_, status)| *status == PhaseStatus::Completed)
        .unwrap_or(0);

    for (index, (kind, status)) in statuses.into_iter().enumerate() {
        match status {
            PhaseStatus::Completed => continue,
            PhaseStatus::NotStarted if index < reached => continue,
            PhaseStatus::Failed { message } => return WorkflowPhase::Failed { kind, message },
            PhaseStatus::TimedOut { .. } => return WorkflowPhase::TimedOut { kind },
            PhaseStatus::Running { .. } => return WorkflowPhase::running(kind),
            PhaseStatus::NotStarted if kind.prerequisite().is_none() => {
                return WorkflowPhase::NotStarted
            }
            PhaseStatus::NotStarted => return WorkflowPhase::running(kind),
        }
    }
    WorkflowPhase::Ready
}
