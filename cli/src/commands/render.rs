//! Terminal output for workflow events and status tables.

use covenant_core::{JobKind, JobStatus, PhaseStatus, WorkflowEvent, WorkflowPhase};
use serde::Serialize;

use crate::error::{CommandError, CommandResult, ResultExt};

/// One row of the status table.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRow {
    pub kind: JobKind,
    #[serde(flatten)]
    pub status: PhaseStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    contract_id: &'a str,
    phase: &'a WorkflowPhase,
    phases: &'a [PhaseRow],
}

/// Prints to stdout, either human-readable lines or one JSON object per line.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    json: bool,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn event(&self, event: &WorkflowEvent) -> CommandResult<()> {
        if self.json {
            println!("{}", serde_json::to_string(event).internal_err()?);
        } else if let Some(line) = describe(event) {
            println!("{}", line);
        }
        Ok(())
    }

    pub fn phase(&self, contract_id: &str, phase: &WorkflowPhase) -> CommandResult<()> {
        let event = WorkflowEvent::PhaseChanged {
            subject_id: contract_id.to_string(),
            phase: phase.clone(),
        };
        self.event(&event)
    }

    pub fn status(
        &self,
        contract_id: &str,
        phase: &WorkflowPhase,
        rows: &[PhaseRow],
    ) -> CommandResult<()> {
        if self.json {
            let report = StatusReport {
                contract_id,
                phase,
                phases: rows,
            };
            println!("{}", serde_json::to_string(&report).internal_err()?);
            return Ok(());
        }

        println!("{}: {}", contract_id, phase);
        for row in rows {
            println!("  {:<18} {}", row.kind.to_string(), status_text(&row.status));
        }
        Ok(())
    }

    pub fn error(&self, err: &CommandError) {
        if self.json {
            match serde_json::to_string(err) {
                Ok(json) => println!("{}", json),
                Err(_) => eprintln!("error: {}", err),
            }
        } else {
            eprintln!("error: {}", err);
        }
    }
}

/// Human-readable line for an event; `None` for events not worth a line.
pub(crate) fn describe(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::PhaseChanged { subject_id, phase } => {
            Some(format!("{}: {}", subject_id, phase))
        }
        WorkflowEvent::JobUpdated { job } => match job.status {
            JobStatus::Processing => Some(format!(
                "  {} processing (poll {})",
                job.kind, job.attempts
            )),
            JobStatus::Completed => Some(format!("  {} completed", job.kind)),
            JobStatus::Failed => Some(format!(
                "  {} failed: {}",
                job.kind,
                job.error_message.as_deref().unwrap_or("unknown error")
            )),
            JobStatus::Idle | JobStatus::Pending => None,
        },
        WorkflowEvent::PollingTimedOut {
            subject_id,
            kind,
            attempts,
        } => Some(format!(
            "  {} still running after {} polls; check again later with `covenant status {}`",
            kind, attempts, subject_id
        )),
    }
}

pub(crate) fn status_text(status: &PhaseStatus) -> String {
    match status {
        PhaseStatus::NotStarted => "not started".to_string(),
        PhaseStatus::Running { attempts } => format!("running ({} polls)", attempts),
        PhaseStatus::Completed => "completed".to_string(),
        PhaseStatus::Failed { message } => format!("failed: {}", message),
        PhaseStatus::TimedOut { attempts } => format!("timed out after {} polls", attempts),
    }
}
