use std::sync::Arc;

use async_trait::async_trait;

use deedscout_common::{Evidence, RoutingDecision, StageOutput};

use crate::traits::{AdapterError, Reasoner, StageAdapter, StageQuery};

/// Deterministic routing used when no reasoning service is configured: any owner
/// reference means the owner is resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedReasoner;

#[async_trait]
impl Reasoner for RuleBasedReasoner {
    async fn decide(
        &self,
        _address: &str,
        evidence: &Evidence,
    ) -> Result<RoutingDecision, AdapterError> {
        Ok(match evidence.current_owner() {
            Some(owner) => {
                let owner_type = owner.effective_type();
                RoutingDecision::resolved(owner.name, Some(owner_type))
            }
            None => RoutingDecision::insufficient(),
        })
    }
}

/// Serves a decision-kind stage by asking the reasoner for a routing decision.
pub struct DecisionStage {
    reasoner: Arc<dyn Reasoner>,
}

impl DecisionStage {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl StageAdapter for DecisionStage {
    async fn lookup(&self, query: StageQuery<'_>) -> Result<StageOutput, AdapterError> {
        let decision = self.reasoner.decide(query.address, query.evidence).await?;
        Ok(StageOutput::default().with_routing(decision))
    }

    fn name(&self) -> &str {
        "reasoner"
    }
}
