//! Adapters between the typed contract API and the job store's vocabulary.

use crate::api::{ApiError, ContractApi};
use crate::jobs::{JobKind, JobStatus};

/// A status report in the shape the store consumes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RemoteReport {
    pub status: String,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl RemoteReport {
    fn completed(payload: serde_json::Value) -> Self {
        Self {
            status: "completed".to_string(),
            payload,
            error: None,
        }
    }

    fn rejected(message: String) -> Self {
        Self {
            status: "failed".to_string(),
            payload: serde_json::Value::Null,
            error: Some(message),
        }
    }

    pub fn local_status(&self) -> Option<JobStatus> {
        JobStatus::from_remote(&self.status)
    }
}

/// What the start request told us.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StartAck {
    /// The job runs remotely; poll for its result.
    Poll,
    /// The start response already carries a terminal result.
    Finished(RemoteReport),
}

/// Issue the start request for a phase.
pub(crate) async fn start(
    api: &dyn ContractApi,
    subject_id: &str,
    kind: JobKind,
) -> Result<StartAck, ApiError> {
    match kind {
        JobKind::TextExtraction => {
            let ack = api.start_extraction(subject_id).await?;
            tracing::debug!(
                subject_id,
                extraction_id = ?ack.extraction_id,
                status = %ack.status,
                "Extraction accepted"
            );
            Ok(ack_to_start(kind, &ack.status))
        }
        JobKind::AiExtraction => {
            let ack = api.start_ai_analysis(subject_id).await?;
            Ok(ack_to_start(kind, &ack.status))
        }
        JobKind::RiskAnalysis => {
            let report = api.analyze_risks(subject_id).await?;
            Ok(StartAck::Finished(RemoteReport::completed(report.risk_analysis)))
        }
        JobKind::ComplianceCheck => {
            let report = api.run_compliance_check(subject_id).await?;
            // No status field means the check ran synchronously.
            let finished = report.status().map_or(true, |s| {
                JobStatus::from_remote(s).is_some_and(JobStatus::is_terminal)
            });
            if finished {
                Ok(StartAck::Finished(compliance_report(report)))
            } else {
                Ok(StartAck::Poll)
            }
        }
    }
}

/// A rejected acknowledgement ends the job; anything else means poll.
fn ack_to_start(kind: JobKind, status: &str) -> StartAck {
    if JobStatus::from_remote(status) == Some(JobStatus::Failed) {
        StartAck::Finished(RemoteReport::rejected(format!(
            "The service rejected the {} request",
            kind
        )))
    } else {
        StartAck::Poll
    }
}

/// Fetch the current status of a phase.
pub(crate) async fn fetch_status(
    api: &dyn ContractApi,
    subject_id: &str,
    kind: JobKind,
) -> Result<RemoteReport, ApiError> {
    match kind {
        JobKind::TextExtraction => {
            let status = api.extraction_status(subject_id).await?;
            let payload =
                serde_json::to_value(&status).map_err(|e| ApiError::decode(e.to_string()))?;
            Ok(RemoteReport {
                status: status.status,
                payload,
                error: status.error,
            })
        }
        JobKind::AiExtraction => {
            let status = api.ai_analysis_status(subject_id).await?;
            Ok(RemoteReport {
                status: status.status,
                payload: serde_json::Value::Object(status.data),
                error: status.error,
            })
        }
        JobKind::RiskAnalysis => Err(ApiError::decode("risk analysis has no status endpoint")),
        JobKind::ComplianceCheck => {
            let report = api.compliance_result(subject_id).await?;
            Ok(compliance_report(report))
        }
    }
}

fn compliance_report(report: crate::api::ComplianceReport) -> RemoteReport {
    let status = report.status().unwrap_or("completed").to_string();
    let error = report.error().map(str::to_string);
    RemoteReport {
        status,
        payload: report.compliance_result,
        error,
    }
}

/// Whether a poll failure should end the phase instead of being retried.
///
/// Auth failures won't fix themselves. A 404 on the extraction endpoints means
/// the job is gone. The compliance result 404s until the check has written
/// something, so there it's retried.
pub(crate) fn is_fatal(kind: JobKind, err: &ApiError) -> bool {
    match err.status_code() {
        Some(401) | Some(403) => true,
        Some(404) => kind != JobKind::ComplianceCheck,
        _ => false,
    }
}
