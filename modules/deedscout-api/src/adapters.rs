//! HTTP-backed implementations of the research traits.

use async_trait::async_trait;

use deedscout_common::{Evidence, OwnershipResult, RoutingDecision, StageId, StageOutput};
use deedscout_research::{AdapterError, Reasoner, StageAdapter, StageQuery};
use stage_client::{ReasonerClient, StageClient, StageClientError, StageRequest};

pub struct HttpStageAdapter {
    stage: StageId,
    client: StageClient,
}

impl HttpStageAdapter {
    pub fn new(stage: StageId, client: StageClient) -> Self {
        Self { stage, client }
    }
}

#[async_trait]
impl StageAdapter for HttpStageAdapter {
    async fn lookup(&self, query: StageQuery<'_>) -> Result<StageOutput, AdapterError> {
        let request = StageRequest {
            stage: query.stage,
            address: query.address,
            subject: query.subject,
            evidence: query.evidence,
        };
        self.client.lookup(&request).await.map_err(to_adapter_error)
    }

    fn name(&self) -> &str {
        self.stage.as_str()
    }
}

pub struct HttpReasoner {
    client: ReasonerClient,
}

impl HttpReasoner {
    pub fn new(client: ReasonerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn decide(
        &self,
        address: &str,
        evidence: &Evidence,
    ) -> Result<RoutingDecision, AdapterError> {
        self.client
            .decide(address, evidence)
            .await
            .map_err(to_adapter_error)
    }

    async fn analyze(
        &self,
        address: &str,
        evidence: &Evidence,
    ) -> anyhow::Result<Option<OwnershipResult>> {
        Ok(self.client.analyze(address, evidence).await?)
    }
}

fn to_adapter_error(err: StageClientError) -> AdapterError {
    match err {
        StageClientError::Timeout => AdapterError::Timeout,
        e if e.is_transient() => AdapterError::Transient(e.to_string()),
        StageClientError::Api {
            status: 400 | 422,
            message,
        } => AdapterError::InvalidInput(message),
        e => AdapterError::Unrecoverable(e.to_string()),
    }
}
