use super::*;
use crate::error::CommandError;
use async_trait::async_trait;
use covenant_core::api::{
    AiAnalysisStarted, AiAnalysisStatus, ComplianceReport, ContractApi, ExtractionStarted,
    ExtractionStatus, RiskReport,
};
use covenant_core::workflow::WorkflowConfig;
use covenant_core::{ApiError, Job, JobStatus, JobStore, PollConfig};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Service where every job finishes as soon as it is started.
#[derive(Default)]
struct InstantApi {
    started: Mutex<HashSet<JobKind>>,
}

impl InstantApi {
    fn start(&self, kind: JobKind) {
        self.started.lock().unwrap().insert(kind);
    }

    fn check(&self, kind: JobKind) -> Result<(), ApiError> {
        if self.started.lock().unwrap().contains(&kind) {
            Ok(())
        } else {
            Err(ApiError::remote(404, "Not found"))
        }
    }
}

#[async_trait]
impl ContractApi for InstantApi {
    async fn start_extraction(&self, _id: &str) -> Result<ExtractionStarted, ApiError> {
        self.start(JobKind::TextExtraction);
        Ok(ExtractionStarted {
            extraction_id: None,
            status: "pending".to_string(),
        })
    }

    async fn extraction_status(&self, _id: &str) -> Result<ExtractionStatus, ApiError> {
        self.check(JobKind::TextExtraction)?;
        Ok(ExtractionStatus {
            status: "completed".to_string(),
            raw_text: Some("Sample".to_string()),
            page_count: Some(1),
            quality_flag: None,
            error: None,
        })
    }

    async fn start_ai_analysis(&self, _id: &str) -> Result<AiAnalysisStarted, ApiError> {
        self.start(JobKind::AiExtraction);
        Ok(AiAnalysisStarted {
            status: "queued".to_string(),
        })
    }

    async fn ai_analysis_status(&self, _id: &str) -> Result<AiAnalysisStatus, ApiError> {
        self.check(JobKind::AiExtraction)?;
        Ok(AiAnalysisStatus {
            status: "done".to_string(),
            error: None,
            data: serde_json::Map::new(),
        })
    }

    async fn analyze_risks(&self, _id: &str) -> Result<RiskReport, ApiError> {
        self.start(JobKind::RiskAnalysis);
        Ok(RiskReport {
            risk_analysis: json!({ "overallRisk": "low" }),
        })
    }

    async fn run_compliance_check(&self, _id: &str) -> Result<ComplianceReport, ApiError> {
        self.start(JobKind::ComplianceCheck);
        Ok(ComplianceReport {
            compliance_result: json!({ "score": 88 }),
        })
    }

    async fn compliance_result(&self, _id: &str) -> Result<ComplianceReport, ApiError> {
        self.check(JobKind::ComplianceCheck)?;
        Ok(ComplianceReport {
            compliance_result: json!({ "score": 88 }),
        })
    }
}

fn create_test_controller(
    api: Arc<InstantApi>,
    auto_advance: bool,
) -> (WorkflowController, UnboundedReceiver<WorkflowEvent>) {
    let (emitter, rx) = ChannelEmitter::new();
    let config = WorkflowConfig {
        poll: PollConfig {
            interval: Duration::from_millis(100),
            max_attempts: 5,
            immediate: true,
        },
        auto_advance,
    };
    let controller = WorkflowController::new(api, JobStore::new(), config, Arc::new(emitter));
    (controller, rx)
}

async fn statuses(controller: &WorkflowController, id: &str) -> Vec<JobStatus> {
    controller
        .snapshot(id)
        .await
        .iter()
        .map(|j: &Job| j.status)
        .collect()
}

// ============================================================================
// Workflow Command Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_analyze_runs_to_ready() {
    let api = Arc::new(InstantApi::default());
    let (controller, mut rx) = create_test_controller(api, true);
    let renderer = Renderer::new(false);

    let phase = analyze(&controller, &mut rx, "c1", &renderer).await.unwrap();

    assert_eq!(phase, WorkflowPhase::Ready);
    assert_eq!(exit_status(&phase), 0);
    assert_eq!(statuses(&controller, "c1").await, vec![JobStatus::Completed; 4]);
}

#[tokio::test(start_paused = true)]
async fn test_analyze_one_phase_at_a_time() {
    let api = Arc::new(InstantApi::default());
    let (controller, mut rx) = create_test_controller(api, false);
    let renderer = Renderer::new(true);

    let phase = analyze(&controller, &mut rx, "c1", &renderer).await.unwrap();
    assert_eq!(phase, WorkflowPhase::AwaitingAiAnalysis);

    let phase = analyze(&controller, &mut rx, "c1", &renderer).await.unwrap();
    assert_eq!(phase, WorkflowPhase::AnalyzingRisk);

    let ai = controller.job("c1", JobKind::AiExtraction).await.unwrap();
    assert_eq!(ai.status, JobStatus::Completed);
    assert!(controller.job("c1", JobKind::RiskAnalysis).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_analyze_finished_contract_starts_nothing() {
    let api = Arc::new(InstantApi::default());
    for kind in JobKind::ALL {
        api.start(kind);
    }
    let (controller, mut rx) = create_test_controller(api, true);

    let phase = analyze(&controller, &mut rx, "c1", &Renderer::new(false))
        .await
        .unwrap();

    assert_eq!(phase, WorkflowPhase::Ready);
    assert!(controller.job("c1", JobKind::RiskAnalysis).await.is_none());
    assert_eq!(controller.active_tasks("c1").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_checks_prerequisite() {
    let api = Arc::new(InstantApi::default());
    let (controller, mut rx) = create_test_controller(api, true);

    let err = retry(
        &controller,
        &mut rx,
        "c1",
        JobKind::RiskAnalysis,
        &Renderer::new(false),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        CommandError::PrerequisiteNotMet {
            phase: JobKind::RiskAnalysis,
            requires: JobKind::AiExtraction,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_status_rows() {
    let api = Arc::new(InstantApi::default());
    api.start(JobKind::TextExtraction);
    let (controller, _rx) = create_test_controller(api, false);

    let rows = status(&controller, "c1", &Renderer::new(false)).await.unwrap();

    let kinds: Vec<JobKind> = rows.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, JobKind::ALL.to_vec());
    assert_eq!(rows[0].status, PhaseStatus::Completed);
    assert!(rows[1..].iter().all(|r| r.status == PhaseStatus::NotStarted));
}

#[tokio::test(start_paused = true)]
async fn test_status_of_finished_contract_is_ready() {
    let api = Arc::new(InstantApi::default());
    for kind in JobKind::ALL {
        api.start(kind);
    }
    let (controller, _rx) = create_test_controller(api, false);

    let rows = status(&controller, "c1", &Renderer::new(true)).await.unwrap();

    assert_eq!(rows[3].status, PhaseStatus::Completed);
    assert_eq!(controller.phase("c1").await, WorkflowPhase::Ready);
}

// ============================================================================
// Output Tests
// ============================================================================

#[test]
fn test_exit_status() {
    assert_eq!(exit_status(&WorkflowPhase::Ready), 0);
    assert_eq!(
        exit_status(&WorkflowPhase::Failed {
            kind: JobKind::AiExtraction,
            message: "model unavailable".to_string()
        }),
        2
    );
    assert_eq!(
        exit_status(&WorkflowPhase::TimedOut {
            kind: JobKind::TextExtraction
        }),
        3
    );
}

#[test]
fn test_describe_events() {
    let line = render::describe(&WorkflowEvent::PollingTimedOut {
        subject_id: "c1".to_string(),
        kind: JobKind::TextExtraction,
        attempts: 60,
    })
    .unwrap();
    assert!(line.contains("60 polls"));
    assert!(line.contains("covenant status c1"));

    let line = render::describe(&WorkflowEvent::PhaseChanged {
        subject_id: "c1".to_string(),
        phase: WorkflowPhase::Extracting,
    })
    .unwrap();
    assert_eq!(line, "c1: extracting text");
}

#[test]
fn test_status_row_json() {
    let row = PhaseRow {
        kind: JobKind::ComplianceCheck,
        status: PhaseStatus::Failed {
            message: "playbook missing".to_string(),
        },
    };
    let value = serde_json::to_value(&row).unwrap();
    assert_eq!(value["kind"], "compliance_check");
    assert_eq!(value["status"], "failed");
    assert_eq!(value["message"], "playbook missing");
    assert_eq!(
        render::status_text(&PhaseStatus::Running { attempts: 4 }),
        "running (4 polls)"
    );
}

// ============================================================================
// Settings Tests
// ============================================================================

#[test]
fn test_flags_override_settings_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let options = GlobalOptions {
        config_dir: Some(temp_dir.path().to_path_buf()),
        ..GlobalOptions::default()
    };
    Settings {
        api_base_url: "http://from-file/api".to_string(),
        ..Settings::default()
    }
    .save(&options.config().settings_file)
    .unwrap();

    let options = GlobalOptions {
        api_url: Some("http://from-flag/api".to_string()),
        ..options
    };
    assert_eq!(options.settings().api_base_url, "http://from-flag/api");
}

#[test]
fn test_configure_persists_settings() {
    let temp_dir = tempfile::tempdir().unwrap();
    let options = GlobalOptions {
        config_dir: Some(temp_dir.path().join("covenant")),
        token: Some("secret".to_string()),
        ..GlobalOptions::default()
    };

    configure(&options, Some(500), Some(10), Some(false)).unwrap();

    let saved = Settings::load(&options.config().settings_file);
    assert_eq!(saved.poll_interval_ms, 500);
    assert_eq!(saved.max_attempts, 10);
    assert!(!saved.auto_advance);
    assert_eq!(saved.api_token.as_deref(), Some("secret"));
}

#[tokio::test]
async fn test_execute_configure_needs_no_service() {
    let temp_dir = tempfile::tempdir().unwrap();
    let options = GlobalOptions {
        config_dir: Some(temp_dir.path().to_path_buf()),
        api_url: Some("http://127.0.0.1:9/api".to_string()),
        ..GlobalOptions::default()
    };
    let command = Command::Configure {
        poll_interval_ms: Some(250),
        max_attempts: None,
        auto_advance: None,
    };

    let exit = execute(command, options.clone()).await.unwrap();

    assert_eq!(exit, 0);
    let saved = Settings::load(&options.config().settings_file);
    assert_eq!(saved.poll_interval_ms, 250);
    assert_eq!(saved.api_base_url, "http://127.0.0.1:9/api");
}
