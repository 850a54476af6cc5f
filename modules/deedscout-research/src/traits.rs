// Trait boundaries between the research core and its collaborators.
//
// StageAdapter: one data source (registry, land records, people search, ...).
// Reasoner: routing decision for the ownership check, optional analysis for ambiguity.
// JobStore: optional persistence mirror for jobs.
//
// The core holds these as trait objects so tests run against in-memory mocks:
// no network, no database.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use deedscout_common::{Evidence, Job, OwnershipResult, RoutingDecision, StageId, StageOutput};

// ---------------------------------------------------------------------------
// StageAdapter
// ---------------------------------------------------------------------------

/// Failure reported by an adapter. The variant decides whether the executor retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Network hiccup, rate limit, upstream 5xx. Worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out")]
    Timeout,

    /// The query itself is unusable (unparseable address, empty name).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The source answered and will keep answering the same way.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_) | AdapterError::Timeout)
    }
}

/// What a stage is asked to look up.
#[derive(Debug, Clone, Copy)]
pub struct StageQuery<'a> {
    pub stage: StageId,
    /// The property address being researched.
    pub address: &'a str,
    /// The address, or the owner/person name the stage searches for.
    pub subject: &'a str,
    /// Everything committed for this address so far.
    pub evidence: &'a Evidence,
}

#[async_trait]
pub trait StageAdapter: Send + Sync {
    async fn lookup(&self, query: StageQuery<'_>) -> Result<StageOutput, AdapterError>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Reasoner
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Decide whether evidence so far resolves the owner or needs another registry lookup.
    async fn decide(&self, address: &str, evidence: &Evidence) -> Result<RoutingDecision, AdapterError>;

    /// Judge ambiguous evidence. `Ok(None)` means "no opinion" and the deterministic
    /// aggregation stands.
    async fn analyze(&self, address: &str, evidence: &Evidence) -> Result<Option<OwnershipResult>> {
        let _ = (address, evidence);
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// JobStore
// ---------------------------------------------------------------------------

/// Persistence mirror. The job manager is the source of truth while a job is in flight.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;

    async fn load(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Cheap liveness probe for health reporting.
    async fn is_connected(&self) -> bool {
        true
    }
}
