//! Drives one address through the workflow graph.
//!
//! Each wave: settle skipped stages, run every eligible stage (concurrent ones together,
//! then sequential ones one at a time), commit outputs in graph order, publish a progress
//! snapshot. The loop ends when the frontier is empty. Every wave settles at least one
//! stage, so a run always terminates. Aggregation runs exactly once, at the end.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info};

use deedscout_common::{
    Evidence, GraphConfigurationError, OwnershipResult, StageId, StageLedger, StageOutcome,
    StageOutput, TaskStatus,
};

use crate::aggregator::ResultAggregator;
use crate::executor::{RetryPolicy, StageError, StageExecutor};
use crate::graph::{Execution, StageKind, WorkflowGraph};
use crate::registry::AdapterRegistry;
use crate::traits::Reasoner;

/// Partial state of a run, published after every wave.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub evidence: Evidence,
    pub stages: StageLedger,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: TaskStatus,
    pub evidence: Evidence,
    pub stages: StageLedger,
    pub errors: Vec<String>,
    pub result: OwnershipResult,
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, snapshot: RunSnapshot);
}

/// Sink for callers that only want the final report.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn progress(&self, _snapshot: RunSnapshot) {}
}

pub struct AddressRunner {
    graph: Arc<WorkflowGraph>,
    executor: StageExecutor,
    aggregator: ResultAggregator,
    reasoner: Option<Arc<dyn Reasoner>>,
}

impl AddressRunner {
    /// Fails if any non-terminal stage of the graph has no adapter.
    pub fn new(
        graph: Arc<WorkflowGraph>,
        registry: AdapterRegistry,
        policy: RetryPolicy,
        aggregator: ResultAggregator,
        reasoner: Option<Arc<dyn Reasoner>>,
    ) -> Result<Self, GraphConfigurationError> {
        registry.check(&graph)?;
        Ok(Self {
            graph,
            executor: StageExecutor::new(Arc::new(registry), policy),
            aggregator,
            reasoner,
        })
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub async fn run(&self, address: &str, progress: &dyn ProgressSink) -> RunReport {
        let mut evidence = Evidence::new();
        let mut ledger = StageLedger::new();
        let mut errors: Vec<String> = Vec::new();

        info!(address, "Research started");

        loop {
            let frontier = self.graph.frontier(&ledger, &evidence);
            if frontier.is_empty() {
                break;
            }

            for stage in &frontier.skipped {
                debug!(address, stage = %stage, "Stage skipped");
                ledger.insert(*stage, StageOutcome::Skipped);
            }

            let mut concurrent = Vec::new();
            let mut sequential = Vec::new();
            for id in &frontier.eligible {
                let Some(spec) = self.graph.spec(*id) else {
                    continue;
                };
                match (spec.kind, spec.execution) {
                    // Served by the aggregator once the loop ends.
                    (StageKind::Terminal, _) => {
                        ledger.insert(spec.id, StageOutcome::Completed);
                    }
                    (_, Execution::Concurrent) => concurrent.push(spec),
                    (_, Execution::Sequential) => sequential.push(spec),
                }
            }

            if concurrent.is_empty() && sequential.is_empty() {
                continue;
            }

            let snapshot = &evidence;
            let mut results: Vec<(StageId, Result<StageOutput, StageError>)> =
                join_all(concurrent.iter().map(|spec| async move {
                    (spec.id, self.executor.execute(spec, address, snapshot).await)
                }))
                .await;
            for spec in sequential {
                results.push((spec.id, self.executor.execute(spec, address, snapshot).await));
            }

            // Commit in graph order so the evidence and error list never depend on which
            // concurrent stage finished first.
            results.sort_by_key(|(id, _)| self.graph.rank(*id));
            for (stage, result) in results {
                match result {
                    Ok(output) => {
                        evidence.commit(stage, output);
                        ledger.insert(stage, StageOutcome::Completed);
                    }
                    Err(e) => {
                        errors.push(e.to_string());
                        ledger.insert(stage, StageOutcome::Failed);
                    }
                }
            }

            progress
                .progress(RunSnapshot {
                    evidence: evidence.clone(),
                    stages: ledger.clone(),
                    errors: errors.clone(),
                })
                .await;
        }

        let result = self
            .aggregator
            .finalize(address, &evidence, self.reasoner.as_deref())
            .await;

        let any_lookup_completed = ledger.iter().any(|(id, outcome)| {
            *outcome == StageOutcome::Completed
                && self
                    .graph
                    .spec(*id)
                    .is_some_and(|s| s.kind == StageKind::Lookup)
        });
        let status = if any_lookup_completed {
            TaskStatus::Done
        } else {
            TaskStatus::Error
        };

        info!(
            address,
            status = %status,
            owner = %result.owner_name,
            confidence = %result.confidence,
            errors = errors.len(),
            "Research finished"
        );

        RunReport {
            status,
            evidence,
            stages: ledger,
            errors,
            result,
        }
    }
}
