//! Covenant Core - job orchestration for the contract analysis service
//!
//! This crate contains everything except the command line:
//! - Gateway client with bearer auth and envelope unwrapping (api)
//! - Per-contract job state with stale-response protection (jobs)
//! - Interval polling with attempt budgets (poller)
//! - Phase sequencing across extraction, AI analysis, risk and compliance (workflow)

pub mod api;
pub mod config;
pub mod jobs;
pub mod poller;
pub mod workflow;

use std::sync::Arc;

pub use api::{ApiClient, ApiError, ContractApi, HttpContractApi, RequestOptions, Session};
pub use config::{Config, Settings};
pub use jobs::{Job, JobKind, JobStatus, JobStore};
pub use poller::{PollConfig, PollHandle, PollOutcome, Poller, QueryError};
pub use workflow::{
    ChannelEmitter, NoOpEmitter, PhaseStatus, StartOutcome, WorkflowController, WorkflowEmitter,
    WorkflowError, WorkflowEvent, WorkflowPhase,
};

/// Build a controller talking HTTP to the service described by `settings`.
pub fn connect(
    settings: &Settings,
    emitter: Arc<dyn WorkflowEmitter>,
) -> Result<WorkflowController, ApiError> {
    let session = Session::new();
    if let Some(token) = &settings.api_token {
        session.set_token(token.clone());
    }
    let client = ApiClient::with_timeout(
        &settings.api_base_url,
        session,
        settings.request_timeout(),
    )?;

    tracing::debug!(base_url = %client.base_url(), "Connecting to contract service");

    Ok(WorkflowController::new(
        Arc::new(HttpContractApi::new(client)),
        JobStore::new(),
        settings.workflow_config(),
        emitter,
    ))
}
