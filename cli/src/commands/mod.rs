//! CLI commands.
//!
//! Every command builds its own controller, reconciles with the service via
//! `hydrate`, does its work, then shuts the controller down.

mod render;
#[cfg(test)]
mod tests;

pub use render::{PhaseRow, Renderer};

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use covenant_core::{
    ChannelEmitter, Config, JobKind, PhaseStatus, Settings, WorkflowController, WorkflowEvent,
    WorkflowPhase,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::CommandResult;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the analysis workflow for a contract until it is ready or stops
    Analyze {
        /// Contract ID
        contract_id: String,
    },
    /// Show where each phase of a contract stands
    Status {
        /// Contract ID
        contract_id: String,
    },
    /// Re-run one phase, then continue the workflow
    Retry {
        /// Contract ID
        contract_id: String,
        /// Phase to re-run (text_extraction, ai_extraction, risk_analysis, compliance_check)
        #[arg(long)]
        phase: JobKind,
    },
    /// Persist connection and polling settings
    Configure {
        /// Milliseconds between status polls
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Status polls before giving up on a phase
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Start the next phase automatically
        #[arg(long)]
        auto_advance: Option<bool>,
    },
}

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub json: bool,
    pub config_dir: Option<PathBuf>,
}

impl GlobalOptions {
    pub fn config(&self) -> Config {
        match &self.config_dir {
            Some(dir) => Config::in_dir(dir.clone()),
            None => Config::load_or_default(),
        }
    }

    /// Settings file, then environment, then flags.
    pub fn settings(&self) -> Settings {
        let config = self.config();
        tracing::debug!("Settings file: {:?}", config.settings_file);
        Settings::load(&config.settings_file)
            .with_env_overrides()
            .with_overrides(self.api_url.clone(), self.token.clone())
    }
}

/// Commands that talk to the service.
#[derive(Debug, Clone, Copy)]
enum Action {
    Analyze,
    Status,
    Retry(JobKind),
}

/// Run a command. Returns the process exit status.
pub async fn execute(command: Command, options: GlobalOptions) -> CommandResult<u8> {
    let renderer = Renderer::new(options.json);

    let (contract_id, action) = match command {
        Command::Configure {
            poll_interval_ms,
            max_attempts,
            auto_advance,
        } => {
            configure(&options, poll_interval_ms, max_attempts, auto_advance)?;
            return Ok(0);
        }
        Command::Analyze { contract_id } => (contract_id, Action::Analyze),
        Command::Status { contract_id } => (contract_id, Action::Status),
        Command::Retry { contract_id, phase } => (contract_id, Action::Retry(phase)),
    };

    let settings = options.settings();
    let (emitter, mut rx) = ChannelEmitter::new();
    let controller = covenant_core::connect(&settings, Arc::new(emitter))?;

    let result = match action {
        Action::Analyze => analyze(&controller, &mut rx, &contract_id, &renderer)
            .await
            .map(|phase| exit_status(&phase)),
        Action::Status => status(&controller, &contract_id, &renderer)
            .await
            .map(|_| 0),
        Action::Retry(kind) => retry(&controller, &mut rx, &contract_id, kind, &renderer)
            .await
            .map(|phase| exit_status(&phase)),
    };

    controller.shutdown().await;
    result
}

/// 0 unless the workflow stopped on a failure or a timeout.
pub fn exit_status(phase: &WorkflowPhase) -> u8 {
    match phase {
        WorkflowPhase::Failed { .. } => 2,
        WorkflowPhase::TimedOut { .. } => 3,
        _ => 0,
    }
}

fn configure(
    options: &GlobalOptions,
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
    auto_advance: Option<bool>,
) -> CommandResult<()> {
    let config = options.config();
    let mut settings = Settings::load(&config.settings_file)
        .with_overrides(options.api_url.clone(), options.token.clone());
    if let Some(ms) = poll_interval_ms {
        settings.poll_interval_ms = ms;
    }
    if let Some(n) = max_attempts {
        settings.max_attempts = n;
    }
    if let Some(on) = auto_advance {
        settings.auto_advance = on;
    }

    settings.save(&config.settings_file)?;
    tracing::info!("Saved settings to {:?}", config.settings_file);
    Ok(())
}

/// What `analyze` should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Already running remotely; just follow it.
    Watch(JobKind),
    Start(JobKind),
}

async fn next_step(controller: &WorkflowController, contract_id: &str) -> Option<Step> {
    // No read endpoint for risk analysis; a compliance result implies it ran.
    if controller
        .phase_status(contract_id, JobKind::ComplianceCheck)
        .await
        == PhaseStatus::Completed
    {
        return None;
    }

    for kind in JobKind::ALL {
        match controller.phase_status(contract_id, kind).await {
            PhaseStatus::Completed => continue,
            PhaseStatus::Running { .. } | PhaseStatus::TimedOut { .. } => {
                return Some(Step::Watch(kind))
            }
            PhaseStatus::NotStarted | PhaseStatus::Failed { .. } => {
                return Some(Step::Start(kind))
            }
        }
    }
    None
}

pub async fn analyze(
    controller: &WorkflowController,
    rx: &mut UnboundedReceiver<WorkflowEvent>,
    contract_id: &str,
    renderer: &Renderer,
) -> CommandResult<WorkflowPhase> {
    let phase = controller.hydrate(contract_id).await?;
    drain(rx);

    let kind = match next_step(controller, contract_id).await {
        None => {
            renderer.phase(contract_id, &WorkflowPhase::Ready)?;
            return Ok(WorkflowPhase::Ready);
        }
        Some(Step::Watch(kind)) => {
            renderer.phase(contract_id, &phase)?;
            kind
        }
        Some(Step::Start(kind)) => {
            tracing::info!(contract_id, %kind, "Starting phase");
            controller.start_phase(contract_id, kind).await?;
            kind
        }
    };

    watch(controller, rx, contract_id, kind, renderer).await
}

pub async fn status(
    controller: &WorkflowController,
    contract_id: &str,
    renderer: &Renderer,
) -> CommandResult<Vec<PhaseRow>> {
    let phase = controller.hydrate(contract_id).await?;

    let mut rows = Vec::with_capacity(JobKind::ALL.len());
    for kind in JobKind::ALL {
        rows.push(PhaseRow {
            kind,
            status: controller.phase_status(contract_id, kind).await,
        });
    }

    renderer.status(contract_id, &phase, &rows)?;
    Ok(rows)
}

pub async fn retry(
    controller: &WorkflowController,
    rx: &mut UnboundedReceiver<WorkflowEvent>,
    contract_id: &str,
    kind: JobKind,
    renderer: &Renderer,
) -> CommandResult<WorkflowPhase> {
    controller.hydrate(contract_id).await?;
    drain(rx);

    controller.retry(contract_id, kind).await?;
    watch(controller, rx, contract_id, kind, renderer).await
}

/// Discard events produced while reconciling.
fn drain(rx: &mut UnboundedReceiver<WorkflowEvent>) {
    while rx.try_recv().is_ok() {}
}

/// Render events until the workflow settles.
///
/// Without auto-advance, stops once `kind` reaches a terminal status. Ctrl+C
/// stops local polling and leaves the remote jobs alone.
async fn watch(
    controller: &WorkflowController,
    rx: &mut UnboundedReceiver<WorkflowEvent>,
    contract_id: &str,
    kind: JobKind,
    renderer: &Renderer,
) -> CommandResult<WorkflowPhase> {
    let auto_advance = controller.config().auto_advance;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut ctrl_c => {
                let stopped = controller.release(contract_id).await;
                tracing::info!(contract_id, stopped, "Interrupted");
                return Err(crate::error::CommandError::interrupted());
            }
            event = rx.recv() => event,
        };

        let Some(event) = event else {
            return Ok(controller.phase(contract_id).await);
        };
        if event.subject_id() != contract_id {
            continue;
        }
        renderer.event(&event)?;

        match &event {
            WorkflowEvent::PhaseChanged { phase, .. } if phase.is_settled() => {
                return Ok(phase.clone());
            }
            WorkflowEvent::JobUpdated { job }
                if !auto_advance && job.kind == kind && job.status.is_terminal() =>
            {
                return Ok(controller.phase(contract_id).await);
            }
            _ => {}
        }
    }
}
