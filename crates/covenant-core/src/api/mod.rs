//! Gateway client for the remote contract service.
//!
//! Every call goes through [`ApiClient::request`], which:
//! - resolves the path against the configured base URL
//! - injects the session's bearer token, if any
//! - unwraps the `{ success, data, message }` envelope
//! - normalizes failures into [`ApiError`]
//!
//! The client never touches job state. Callers decide what a response means.

pub mod contracts;

pub use contracts::{
    AiAnalysisStarted, AiAnalysisStatus, ComplianceReport, ContractApi, ExtractionStarted,
    ExtractionStatus, HttpContractApi, RiskReport,
};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the gateway client.
///
/// The client does not interpret these; a 404 is just a `Remote` error with
/// `status_code == 404`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response was received (connection refused, DNS, timeout).
    #[error("Could not reach the contract service: {message}")]
    Network { message: String },
    /// The service answered with a non-2xx status or `success: false`.
    #[error("{message}")]
    Remote { status_code: u16, message: String },
    /// The service answered 2xx but the body did not match the expected shape.
    #[error("Unexpected response from the contract service: {message}")]
    Decode { message: String },
    /// The caller cancelled the request before it finished.
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn remote(status_code: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status_code,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// HTTP status code, when the service answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Remote { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

/// Caller-owned session state.
///
/// Cloning shares the same token slot, so a login elsewhere is picked up by
/// the next request without rebuilding the client.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut slot = match self.token.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = if token.is_empty() { None } else { Some(token) };
    }

    pub fn clear(&self) {
        let mut slot = match self.token.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }

    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Abort the request when this token fires.
    pub cancel: Option<CancellationToken>,
    /// Override the client-wide timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn cancellable(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            timeout: None,
        }
    }
}

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Error body shape. Some handlers use `error` instead of `message`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the contract service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    session: Session,
}

impl ApiClient {
    /// Create a client with reqwest's default settings.
    pub fn new(base_url: &str, session: Session) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Create a client with a request timeout applied to every call.
    pub fn with_timeout(
        base_url: &str,
        session: Session,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue a request and decode the envelope's `data` into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("X-Request-Id", &request_id);
        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            decode_response::<T>(status, &bytes)
        };

        let result = match options.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ApiError::Cancelled),
                    result = exchange => result,
                }
            }
            None => exchange.await,
        };

        match &result {
            Ok(_) => tracing::debug!(%method, %url, %request_id, "Request succeeded"),
            Err(ApiError::Cancelled) => {
                tracing::debug!(%method, %url, %request_id, "Request cancelled")
            }
            Err(e) => tracing::debug!(%method, %url, %request_id, error = %e, "Request failed"),
        }

        result
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, body, RequestOptions::default())
            .await
    }
}

/// Turn a raw status + body into a decoded payload or a normalized error.
fn decode_response<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, ApiError> {
    if !(200..300).contains(&status) {
        return Err(ApiError::remote(status, error_message(status, body)));
    }

    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| ApiError::decode(e.to_string()))?;

    if !envelope.success {
        let message = envelope
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback_message(status));
        return Err(ApiError::remote(status, message));
    }

    let data = envelope.data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data).map_err(|e| ApiError::decode(e.to_string()))
}

fn error_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback_message(status))
}

fn fallback_message(status: u16) -> String {
    format!("Request failed with status {}", status)
}
