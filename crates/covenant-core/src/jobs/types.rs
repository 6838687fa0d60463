//! Job types tracked per contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of remote operation, in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    TextExtraction,
    AiExtraction,
    RiskAnalysis,
    ComplianceCheck,
}

impl JobKind {
    /// All kinds in the order the workflow runs them.
    pub const ALL: [JobKind; 4] = [
        JobKind::TextExtraction,
        JobKind::AiExtraction,
        JobKind::RiskAnalysis,
        JobKind::ComplianceCheck,
    ];

    /// The kind that must be completed before this one may start.
    pub fn prerequisite(self) -> Option<JobKind> {
        match self {
            JobKind::TextExtraction => None,
            JobKind::AiExtraction => Some(JobKind::TextExtraction),
            JobKind::RiskAnalysis => Some(JobKind::AiExtraction),
            JobKind::ComplianceCheck => Some(JobKind::RiskAnalysis),
        }
    }

    /// The kind that follows this one.
    pub fn next(self) -> Option<JobKind> {
        match self {
            JobKind::TextExtraction => Some(JobKind::AiExtraction),
            JobKind::AiExtraction => Some(JobKind::RiskAnalysis),
            JobKind::RiskAnalysis => Some(JobKind::ComplianceCheck),
            JobKind::ComplianceCheck => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::TextExtraction => "text_extraction",
            JobKind::AiExtraction => "ai_extraction",
            JobKind::RiskAnalysis => "risk_analysis",
            JobKind::ComplianceCheck => "compliance_check",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown job kind: {}", s))
    }
}

/// Local job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map the service's status vocabulary onto the local enum.
    ///
    /// Returns `None` for words the service isn't documented to send.
    pub fn from_remote(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(JobStatus::Pending),
            "processing" | "in_progress" | "running" => Some(JobStatus::Processing),
            "completed" | "complete" | "done" => Some(JobStatus::Completed),
            "failed" | "error" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of one asynchronous remote operation on a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub subject_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Present only when `status == Completed`
    pub result: Option<serde_json::Value>,
    /// Present only when `status == Failed`
    pub error_message: Option<String>,
    /// Status polls recorded since the job started
    pub attempts: u32,
    /// Last transient poll failure, kept for display while polling continues
    pub last_poll_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Bumped by every start; poll responses carry the generation they were issued under
    pub generation: u64,
}

/// Map key for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub subject_id: String,
    pub kind: JobKind,
}

impl JobKey {
    pub fn new(subject_id: &str, kind: JobKind) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            kind,
        }
    }
}

/// Result of feeding a poll response into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The job was updated; carries the new snapshot.
    Applied(Job),
    /// The response belongs to an older generation and was dropped.
    Stale,
    /// The job already reached a terminal status; nothing changed.
    AlreadyTerminal,
    /// No job exists for the key (never started or cleared).
    Missing,
}

impl ApplyOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            ApplyOutcome::Applied(job) => Some(job),
            _ => None,
        }
    }
}
