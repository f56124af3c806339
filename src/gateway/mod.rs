use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{
    Action, Captions, DownloadRequest, DownloadedFile, HealthStatus, JobRequest, StatusPayload,
    SubmittedJob,
};

/// Default proxy endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/transcribe";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the proxy
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Request/response boundary to the remote job service.
///
/// Callers abort an in-flight call by dropping its future, which is how the
/// poller and the client tie requests to a cancellation token.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Start a transcription job
    async fn submit(&self, request: &JobRequest) -> Result<SubmittedJob>;

    /// Fetch the normalized status of a job
    async fn get_status(&self, job_id: &str) -> Result<StatusPayload>;

    /// Ask the backend to stop a job. Best effort.
    async fn cancel(&self, job_id: &str) -> Result<()>;

    /// Retrieve existing subtitles for a link, without a job
    async fn fetch_captions(&self, link: &str) -> Result<Captions>;

    /// Convert text to a subtitle/text file on the backend
    async fn download_file(&self, request: &DownloadRequest) -> Result<DownloadedFile>;

    /// Probe backend readiness
    async fn health(&self) -> Result<HealthStatus>;
}

/// Gateway speaking JSON over HTTP to a single proxy endpoint
pub struct HttpGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("{}/{}", crate::NAME, crate::VERSION))
            .build()?;

        let api_key = config
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self { client, endpoint: config.endpoint, api_key })
    }

    async fn post_action(&self, body: Value, authenticated: bool) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("X-Request-ID", Uuid::new_v4().to_string())
            .json(&body);

        if authenticated {
            let key = self.api_key.as_deref().ok_or(Error::MissingCredential)?;
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!("Proxy returned HTTP {}", status.as_u16());
            return Err(Error::Remote { status: status.as_u16(), body: text });
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("response is not valid JSON: {e}")))
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn submit(&self, request: &JobRequest) -> Result<SubmittedJob> {
        request.validate()?;
        debug!("Submitting {} job for {}", request.model, request.display_input());

        let reply = self.post_action(request.to_body(), true).await?;
        SubmittedJob::from_value(&reply)
    }

    async fn get_status(&self, job_id: &str) -> Result<StatusPayload> {
        let body = Action::GetJobStatus.body(json!({ "job_id": job_id }));
        let reply = self.post_action(body, true).await?;
        StatusPayload::from_value(reply)
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let body = Action::CancelJob.body(json!({ "job_id": job_id }));
        self.post_action(body, true).await?;
        Ok(())
    }

    async fn fetch_captions(&self, link: &str) -> Result<Captions> {
        let link = link.trim();
        if link.is_empty() {
            return Err(Error::InvalidInput("a link is required".to_string()));
        }

        let body = Action::FetchCaptions.body(json!({ "link": link }));
        let reply = match self.post_action(body, true).await {
            Ok(reply) => reply,
            Err(Error::Remote { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(Error::NotFound(format!("no captions available for {link}")));
            }
            Err(e) => return Err(e),
        };
        Captions::from_value(link, reply)
    }

    async fn download_file(&self, request: &DownloadRequest) -> Result<DownloadedFile> {
        let body = Action::DownloadFile.body(json!({
            "text": request.text,
            "format": request.format,
            "timestamps": request.timestamps,
        }));
        let reply = self.post_action(body, true).await?;
        DownloadedFile::from_value(reply)
    }

    async fn health(&self) -> Result<HealthStatus> {
        let reply = self.post_action(Action::CheckHealth.body(json!({})), false).await?;
        let status: HealthStatus = serde_json::from_value(reply)?;
        if !status.ready {
            warn!("Backend reports it is not ready");
        }
        Ok(status)
    }
}
