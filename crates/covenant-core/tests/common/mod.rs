//! Scripted stand-in for the contract service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use covenant_core::api::{
    AiAnalysisStarted, AiAnalysisStatus, ComplianceReport, ContractApi, ExtractionStarted,
    ExtractionStatus, RiskReport,
};
use covenant_core::workflow::WorkflowConfig;
use covenant_core::{
    ApiError, ChannelEmitter, JobStore, PollConfig, WorkflowController, WorkflowEvent,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

/// Responses for one endpoint: queued ones first, then the fallback.
pub struct Script<T> {
    queue: Mutex<VecDeque<Result<T, ApiError>>>,
    fallback: Mutex<Option<Result<T, ApiError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            delay: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn push(&self, response: Result<T, ApiError>) -> &Self {
        self.queue.lock().unwrap().push_back(response);
        self
    }

    pub fn push_ok(&self, value: T) -> &Self {
        self.push(Ok(value))
    }

    pub fn always(&self, response: Result<T, ApiError>) -> &Self {
        *self.fallback.lock().unwrap() = Some(response);
        self
    }

    /// Hold every response for `delay` before answering.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<T, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        match queued {
            Some(response) => response,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ApiError::network("no scripted response"))),
        }
    }
}

pub struct FakeApi {
    pub extract: Script<ExtractionStarted>,
    pub extraction: Script<ExtractionStatus>,
    pub ai_start: Script<AiAnalysisStarted>,
    pub ai_status: Script<AiAnalysisStatus>,
    pub risks: Script<RiskReport>,
    pub compliance_check: Script<ComplianceReport>,
    pub compliance_result: Script<ComplianceReport>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            extract: Script::new(),
            extraction: Script::new(),
            ai_start: Script::new(),
            ai_status: Script::new(),
            risks: Script::new(),
            compliance_check: Script::new(),
            compliance_result: Script::new(),
        })
    }

    /// Every phase accepts its start and completes on the first poll.
    pub fn happy() -> Arc<Self> {
        let api = Self::new();
        api.extract.always(Ok(extraction_started("pending")));
        api.extraction.always(Ok(extraction_completed("Sample")));
        api.ai_start.always(Ok(ai_started("pending")));
        api.ai_status.always(Ok(ai_completed()));
        api.risks.always(Ok(RiskReport {
            risk_analysis: json!({ "overallRisk": "medium", "risks": [] }),
        }));
        api.compliance_check.always(Ok(compliance(json!({ "score": 92 }))));
        api.compliance_result.always(Ok(compliance(json!({ "score": 92 }))));
        api
    }
}

#[async_trait]
impl ContractApi for FakeApi {
    async fn start_extraction(&self, _contract_id: &str) -> Result<ExtractionStarted, ApiError> {
        self.extract.next().await
    }

    async fn extraction_status(&self, _contract_id: &str) -> Result<ExtractionStatus, ApiError> {
        self.extraction.next().await
    }

    async fn start_ai_analysis(&self, _contract_id: &str) -> Result<AiAnalysisStarted, ApiError> {
        self.ai_start.next().await
    }

    async fn ai_analysis_status(&self, _contract_id: &str) -> Result<AiAnalysisStatus, ApiError> {
        self.ai_status.next().await
    }

    async fn analyze_risks(&self, _contract_id: &str) -> Result<RiskReport, ApiError> {
        self.risks.next().await
    }

    async fn run_compliance_check(
        &self,
        _contract_id: &str,
    ) -> Result<ComplianceReport, ApiError> {
        self.compliance_check.next().await
    }

    async fn compliance_result(&self, _contract_id: &str) -> Result<ComplianceReport, ApiError> {
        self.compliance_result.next().await
    }
}

pub fn extraction_started(status: &str) -> ExtractionStarted {
    ExtractionStarted {
        extraction_id: Some("ext-1".to_string()),
        status: status.to_string(),
    }
}

pub fn extraction(status: &str) -> ExtractionStatus {
    ExtractionStatus {
        status: status.to_string(),
        raw_text: None,
        page_count: None,
        quality_flag: None,
        error: None,
    }
}

pub fn extraction_completed(raw_text: &str) -> ExtractionStatus {
    ExtractionStatus {
        raw_text: Some(raw_text.to_string()),
        page_count: Some(1),
        ..extraction("completed")
    }
}

pub fn ai_started(status: &str) -> AiAnalysisStarted {
    AiAnalysisStarted {
        status: status.to_string(),
    }
}

pub fn ai_status(status: &str, error: Option<&str>) -> AiAnalysisStatus {
    AiAnalysisStatus {
        status: status.to_string(),
        error: error.map(str::to_string),
        data: serde_json::Map::new(),
    }
}

pub fn ai_completed() -> AiAnalysisStatus {
    let mut status = ai_status("completed", None);
    status
        .data
        .insert("parties".to_string(), json!(["Acme", "Globex"]));
    status
}

pub fn compliance(result: serde_json::Value) -> ComplianceReport {
    ComplianceReport {
        compliance_result: result,
    }
}

pub fn poll_config(interval_ms: u64, max_attempts: u32) -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(interval_ms),
        max_attempts,
        immediate: true,
    }
}

pub fn controller(
    api: Arc<FakeApi>,
    poll: PollConfig,
    auto_advance: bool,
) -> (WorkflowController, UnboundedReceiver<WorkflowEvent>) {
    let (emitter, rx) = ChannelEmitter::new();
    let controller = WorkflowController::new(
        api,
        JobStore::new(),
        WorkflowConfig { poll, auto_advance },
        Arc::new(emitter),
    );
    (controller, rx)
}

/// Receive events until one matches, failing after ten minutes of paused time.
pub async fn wait_for(
    rx: &mut UnboundedReceiver<WorkflowEvent>,
    matches: impl Fn(&WorkflowEvent) -> bool,
) -> WorkflowEvent {
    let waited = tokio::time::timeout(Duration::from_secs(600), async {
        while let Some(event) = rx.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match waited {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("timed out waiting for event"),
    }
}
