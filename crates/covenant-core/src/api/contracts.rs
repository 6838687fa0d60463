//! Typed endpoints of the contract service.
//!
//! The workflow controller only sees [`ContractApi`], so tests can swap in a
//! scripted fake without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ApiClient, ApiError};

/// Acknowledgement of `POST /extraction/contracts/{id}/extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStarted {
    #[serde(default)]
    pub extraction_id: Option<String>,
    pub status: String,
}

/// Body of `GET /extraction/contracts/{id}/extraction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Acknowledgement of `POST /extraction/contracts/{id}/ai-analysis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysisStarted {
    pub status: String,
}

/// Body of `GET /extraction/contracts/{id}/ai-analysis`.
///
/// Everything besides `status` and `error` is the extracted clause data and
/// is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysisStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST /ai/contracts/{id}/risks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub risk_analysis: serde_json::Value,
}

/// Body of the playbook check and result endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub compliance_result: serde_json::Value,
}

impl ComplianceReport {
    /// The check's own status, when the service runs it asynchronously.
    ///
    /// A result without a `status` field is a finished check.
    pub fn status(&self) -> Option<&str> {
        self.compliance_result.get("status").and_then(|s| s.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        self.compliance_result
            .get("error")
            .and_then(|s| s.as_str())
    }
}

/// Remote operations the workflow depends on.
#[async_trait]
pub trait ContractApi: Send + Sync {
    async fn start_extraction(&self, contract_id: &str) -> Result<ExtractionStarted, ApiError>;

    async fn extraction_status(&self, contract_id: &str) -> Result<ExtractionStatus, ApiError>;

    async fn start_ai_analysis(&self, contract_id: &str) -> Result<AiAnalysisStarted, ApiError>;

    async fn ai_analysis_status(&self, contract_id: &str) -> Result<AiAnalysisStatus, ApiError>;

    async fn analyze_risks(&self, contract_id: &str) -> Result<RiskReport, ApiError>;

    async fn run_compliance_check(&self, contract_id: &str)
        -> Result<ComplianceReport, ApiError>;

    /// Fails with a 404 `Remote` error when no check has been run yet.
    async fn compliance_result(&self, contract_id: &str) -> Result<ComplianceReport, ApiError>;
}

/// [`ContractApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpContractApi {
    client: ApiClient,
}

impl HttpContractApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

}

/// `/{section}/contracts/{id}/{action}` with the id as one encoded segment.
fn contract_path(section: &str, contract_id: &str, action: &str) -> String {
    format!(
        "/{}/contracts/{}/{}",
        section,
        urlencoding::encode(contract_id),
        action
    )
}

#[async_trait]
impl ContractApi for HttpContractApi {
    async fn start_extraction(&self, contract_id: &str) -> Result<ExtractionStarted, ApiError> {
        self.client
            .post(&contract_path("extraction", contract_id, "extract"), None)
            .await
    }

    async fn extraction_status(&self, contract_id: &str) -> Result<ExtractionStatus, ApiError> {
        self.client
            .get(&contract_path("extraction", contract_id, "extraction"))
            .await
    }

    async fn start_ai_analysis(&self, contract_id: &str) -> Result<AiAnalysisStarted, ApiError> {
        self.client
            .post(&contract_path("extraction", contract_id, "ai-analysis"), None)
            .await
    }

    async fn ai_analysis_status(&self, contract_id: &str) -> Result<AiAnalysisStatus, ApiError> {
        self.client
            .get(&contract_path("extraction", contract_id, "ai-analysis"))
            .await
    }

    async fn analyze_risks(&self, contract_id: &str) -> Result<RiskReport, ApiError> {
        self.client
            .post(&contract_path("ai", contract_id, "risks"), None)
            .await
    }

    async fn run_compliance_check(
        &self,
        contract_id: &str,
    ) -> Result<ComplianceReport, ApiError> {
        self.client
            .post(&contract_path("playbook", contract_id, "check"), None)
            .await
    }

    async fn compliance_result(&self, contract_id: &str) -> Result<ComplianceReport, ApiError> {
        self.client
            .get(&contract_path("playbook", contract_id, "result"))
            .await
    }
}
