pub mod error;
pub mod types;

pub use error::{Result, StageClientError};
pub use types::{AnalyzeResponse, ReasonRequest, StageRequest};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use deedscout_common::{Evidence, OwnershipResult, RoutingDecision, StageOutput};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin JSON-over-HTTP transport shared by the stage and reasoner clients.
#[derive(Clone)]
struct Transport {
    client: reqwest::Client,
    token: Option<String>,
}

impl Transport {
    fn new(token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StageClientError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: token.map(String::from),
        })
    }

    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self.client.post(endpoint).json(body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StageClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Client for one stage service. The service receives
/// `{stage, address, subject, evidence}` and answers with a stage output.
#[derive(Clone)]
pub struct StageClient {
    transport: Transport,
    url: String,
}

impl StageClient {
    pub fn new(url: &str, token: Option<&str>) -> Result<Self> {
        Self::with_timeout(url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(token, timeout)?,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn lookup(&self, request: &StageRequest<'_>) -> Result<StageOutput> {
        debug!(url = %self.url, stage = %request.stage, subject = request.subject, "Stage lookup");
        self.transport.post(&self.url, request).await
    }
}

/// Client for the reasoning service: `POST {base}/decide` and `POST {base}/analyze`.
#[derive(Clone)]
pub struct ReasonerClient {
    transport: Transport,
    base_url: String,
}

impl ReasonerClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(token, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn decide(&self, address: &str, evidence: &Evidence) -> Result<RoutingDecision> {
        let endpoint = format!("{}/decide", self.base_url);
        self.transport
            .post(&endpoint, &ReasonRequest { address, evidence })
            .await
    }

    /// `Ok(None)` when the service declines to judge.
    pub async fn analyze(
        &self,
        address: &str,
        evidence: &Evidence,
    ) -> Result<Option<OwnershipResult>> {
        let endpoint = format!("{}/analyze", self.base_url);
        let resp: AnalyzeResponse = self
            .transport
            .post(&endpoint, &ReasonRequest { address, evidence })
            .await?;
        Ok(resp.result)
    }
}
