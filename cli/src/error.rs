//! Command error types for the command line
//!
//! Errors print as plain messages, or as `{"code": "...", "message": "..."}` in
//! JSON mode.

use covenant_core::{ApiError, JobKind, WorkflowError};
use serde::Serialize;

/// Errors returned by CLI commands
///
/// Each variant serializes with a snake_case `code` field for script matching.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    // Workflow errors
    PrerequisiteNotMet {
        message: String,
        phase: JobKind,
        requires: JobKind,
    },
    NotTimedOut { message: String },

    // Service errors
    Unauthorized { message: String },
    NotFound { message: String },
    ServiceError { message: String, status_code: u16 },
    NetworkError { message: String },
    ExternalError { message: String },

    // Operation errors
    Interrupted { message: String },
    InternalError { message: String },
}

impl CommandError {
    pub fn interrupted() -> Self {
        Self::Interrupted {
            message: "Interrupted; remote jobs keep running on the service".to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::PrerequisiteNotMet { message, .. }
            | Self::NotTimedOut { message }
            | Self::Unauthorized { message }
            | Self::NotFound { message }
            | Self::ServiceError { message, .. }
            | Self::NetworkError { message }
            | Self::ExternalError { message }
            | Self::Interrupted { message }
            | Self::InternalError { message } => message,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for CommandError {}

impl From<ApiError> for CommandError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match err {
            ApiError::Remote {
                status_code: 401 | 403,
                ..
            } => Self::Unauthorized { message },
            ApiError::Remote {
                status_code: 404, ..
            } => Self::NotFound { message },
            ApiError::Remote { status_code, .. } => Self::ServiceError {
                message,
                status_code,
            },
            ApiError::Network { .. } => Self::NetworkError { message },
            ApiError::Decode { .. } => Self::ExternalError { message },
            ApiError::Cancelled => Self::interrupted(),
        }
    }
}

impl From<WorkflowError> for CommandError {
    fn from(err: WorkflowError) -> Self {
        let message = err.to_string();
        match err {
            WorkflowError::PrerequisiteNotMet { kind, requires } => Self::PrerequisiteNotMet {
                message,
                phase: kind,
                requires,
            },
            WorkflowError::NotTimedOut { .. } => Self::NotTimedOut { message },
            WorkflowError::ShutDown => Self::interrupted(),
            WorkflowError::Api(e) => e.into(),
        }
    }
}

// Conversion from anyhow::Error (settings persistence)
impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result type alias for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Extension trait for converting Results to CommandResult
pub trait ResultExt<T> {
    fn internal_err(self) -> CommandResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn internal_err(self) -> CommandResult<T> {
        self.map_err(|e| CommandError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_code() {
        let err = CommandError::from(ApiError::remote(404, "Contract not found"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "not_found");
        assert_eq!(value["message"], "Contract not found");
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(
            CommandError::from(ApiError::remote(401, "expired")),
            CommandError::Unauthorized { .. }
        ));
        assert!(matches!(
            CommandError::from(ApiError::remote(500, "boom")),
            CommandError::ServiceError {
                status_code: 500,
                ..
            }
        ));
        assert!(matches!(
            CommandError::from(ApiError::network("refused")),
            CommandError::NetworkError { .. }
        ));
        assert!(matches!(
            CommandError::from(ApiError::Cancelled),
            CommandError::Interrupted { .. }
        ));
    }

    #[test]
    fn test_workflow_error_mapping() {
        let err = CommandError::from(WorkflowError::PrerequisiteNotMet {
            kind: JobKind::RiskAnalysis,
            requires: JobKind::AiExtraction,
        });
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "prerequisite_not_met");
        assert_eq!(value["phase"], "risk_analysis");
        assert_eq!(value["requires"], "ai_extraction");

        let err = CommandError::from(WorkflowError::Api(ApiError::remote(403, "forbidden")));
        assert_eq!(err.to_string(), "forbidden");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), &str> = Err("bad json");
        let err = result.internal_err().unwrap_err();
        assert!(matches!(err, CommandError::InternalError { .. }));
        assert_eq!(err.to_string(), "bad json");
    }
}
