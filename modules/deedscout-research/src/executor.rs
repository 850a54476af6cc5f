//! Runs one stage's adapter with a per-attempt timeout and bounded retries.
//!
//! Transient failures (network, rate limit, timeout) are retried after a fixed delay up to
//! `max_attempts` total attempts. Permanent failures return on the first attempt. Either
//! way the result is a `StageError` the runner records; it never aborts the address.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use deedscout_common::config::MAX_RETRY_DELAY;
use deedscout_common::{Config, Evidence, StageId, StageOutput};

use crate::graph::{resolved_person, StageSpec, Subject};
use crate::registry::AdapterRegistry;
use crate::traits::{AdapterError, StageQuery};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage}: {message}")]
pub struct StageError {
    pub stage: StageId,
    pub message: String,
    /// The failure was transient; a later run might succeed.
    pub recoverable: bool,
}

impl StageError {
    fn permanent(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            recoverable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: delay.min(MAX_RETRY_DELAY),
            attempt_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stage_max_attempts,
            config.stage_retry_delay,
            config.stage_timeout,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(90))
    }
}

pub struct StageExecutor {
    registry: Arc<AdapterRegistry>,
    policy: RetryPolicy,
}

impl StageExecutor {
    pub fn new(registry: Arc<AdapterRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn execute(
        &self,
        spec: &StageSpec,
        address: &str,
        evidence: &Evidence,
    ) -> Result<StageOutput, StageError> {
        let stage = spec.id;
        let adapter = self
            .registry
            .get(stage)
            .ok_or_else(|| StageError::permanent(stage, "no adapter registered"))?;

        let subject = match spec.subject {
            Subject::Address => Some(address.to_string()),
            Subject::Owner => evidence.current_owner().map(|o| o.name),
            Subject::Person => resolved_person(evidence),
        }
        .ok_or_else(|| StageError::permanent(stage, "no subject resolved from evidence"))?;

        let query = StageQuery {
            stage,
            address,
            subject: &subject,
            evidence,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.policy.attempt_timeout, adapter.lookup(query))
                .await
                .unwrap_or(Err(AdapterError::Timeout));

            let err = match result {
                Ok(output) => {
                    debug!(
                        stage = %stage,
                        adapter = adapter.name(),
                        attempt,
                        owners = output.owners.len(),
                        contacts = output.contacts.len(),
                        "Stage completed"
                    );
                    return Ok(output);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!(stage = %stage, address, error = %err, "Stage failed permanently");
                return Err(StageError::permanent(stage, err.to_string()));
            }

            if attempt >= self.policy.max_attempts {
                warn!(
                    stage = %stage,
                    address,
                    attempts = attempt,
                    error = %err,
                    "Stage failed after retries"
                );
                return Err(StageError {
                    stage,
                    message: format!("{err} (after {attempt} attempts)"),
                    recoverable: true,
                });
            }

            warn!(
                stage = %stage,
                address,
                attempt,
                delay_ms = self.policy.delay.as_millis() as u64,
                error = %err,
                "Stage failed, retrying"
            );
            tokio::time::sleep(self.policy.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageSpec;
    use crate::testing::MockAdapter;
    use deedscout_common::{OwnerCandidate, OwnerType, Provenance};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::from_millis(200))
    }

    fn executor(stage: StageId, adapter: Arc<MockAdapter>, policy: RetryPolicy) -> StageExecutor {
        StageExecutor::new(Arc::new(AdapterRegistry::new().with(stage, adapter)), policy)
    }

    fn owner(name: &str) -> StageOutput {
        StageOutput::default().with_owner(OwnerCandidate::new(name, Provenance::Registry))
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let adapter = Arc::new(
            MockAdapter::new("registry")
                .fail_first(2, AdapterError::Transient("502".into()))
                .respond(owner("JANE DOE")),
        );
        let exec = executor(StageId::PropertyRegistry, adapter.clone(), fast_policy(3));

        let out = exec
            .execute(&StageSpec::lookup(StageId::PropertyRegistry), "1 MAIN ST", &Evidence::new())
            .await
            .unwrap();
        assert_eq!(out.owners[0].name, "JANE DOE");
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let adapter = Arc::new(
            MockAdapter::new("registry").fail_with(AdapterError::Transient("503".into())),
        );
        let exec = executor(StageId::PropertyRegistry, adapter.clone(), fast_policy(2));

        let err = exec
            .execute(&StageSpec::lookup(StageId::PropertyRegistry), "1 MAIN ST", &Evidence::new())
            .await
            .unwrap_err();
        assert!(err.recoverable);
        assert_eq!(err.stage, StageId::PropertyRegistry);
        assert_eq!(adapter.call_count(), 2);
        assert!(err.to_string().starts_with("property_registry:"));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let adapter = Arc::new(
            MockAdapter::new("registry").fail_with(AdapterError::Unrecoverable("404".into())),
        );
        let exec = executor(StageId::PropertyRegistry, adapter.clone(), fast_policy(3));

        let err = exec
            .execute(&StageSpec::lookup(StageId::PropertyRegistry), "1 MAIN ST", &Evidence::new())
            .await
            .unwrap_err();
        assert!(!err.recoverable);
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_attempt_times_out_and_retries() {
        let adapter = Arc::new(
            MockAdapter::new("registry")
                .respond(owner("JANE DOE"))
                .delay(Duration::from_secs(5)),
        );
        let exec = executor(StageId::PropertyRegistry, adapter.clone(), fast_policy(2));

        let err = exec
            .execute(&StageSpec::lookup(StageId::PropertyRegistry), "1 MAIN ST", &Evidence::new())
            .await
            .unwrap_err();
        assert!(err.recoverable);
        assert!(err.message.contains("timed out"));
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test]
    async fn owner_subject_comes_from_evidence() {
        let adapter = Arc::new(MockAdapter::new("corporate").respond(StageOutput::default()));
        let exec = executor(StageId::CorporateRegistry, adapter.clone(), fast_policy(1));
        let spec = StageSpec::lookup(StageId::CorporateRegistry).subject(Subject::Owner);

        let mut evidence = Evidence::new();
        evidence.commit(
            StageId::PropertyRegistry,
            StageOutput::default().with_owner(
                OwnerCandidate::new("ACME HOLDINGS LLC", Provenance::Registry)
                    .with_type(OwnerType::Llc),
            ),
        );
        exec.execute(&spec, "1 MAIN ST", &evidence).await.unwrap();
        assert_eq!(adapter.subjects(), vec!["ACME HOLDINGS LLC".to_string()]);
    }

    #[tokio::test]
    async fn missing_subject_is_permanent() {
        let adapter = Arc::new(MockAdapter::new("people").respond(StageOutput::default()));
        let exec = executor(StageId::PeopleSearch, adapter.clone(), fast_policy(3));
        let spec = StageSpec::lookup(StageId::PeopleSearch).subject(Subject::Person);

        let err = exec.execute(&spec, "1 MAIN ST", &Evidence::new()).await.unwrap_err();
        assert!(!err.recoverable);
        assert_eq!(adapter.call_count(), 0);
    }
}
