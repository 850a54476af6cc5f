// Test mocks for the research pipeline.
//
// Mocks matching the trait boundaries:
// - MockAdapter (StageAdapter): scripted outputs/failures, records every subject
// - ScriptedReasoner (Reasoner): fixed routing decision and analysis
// - FailingJobStore (JobStore): every call errors
// - RecordingSink (ProgressSink): keeps every snapshot published
//
// Plus helpers for building owner/contact candidates and a mock-backed runner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use deedscout_common::{
    ContactCandidate, Evidence, Job, OwnerCandidate, OwnershipResult, Provenance, RoutingDecision,
    StageId, StageOutput,
};

use crate::aggregator::ResultAggregator;
use crate::executor::RetryPolicy;
use crate::graph::{property_research_graph, WorkflowGraph};
use crate::reasoner::{DecisionStage, RuleBasedReasoner};
use crate::registry::AdapterRegistry;
use crate::runner::{AddressRunner, ProgressSink, RunSnapshot};
use crate::traits::{AdapterError, JobStore, Reasoner, StageAdapter, StageQuery};

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

/// Scripted stage adapter. Resolution order for each call: queued failures, a permanent
/// failure, a per-subject output, the default output. Anything else is an
/// `Unrecoverable` error naming the subject.
/// Builder pattern: `.respond()`, `.on_subject()`, `.fail_with()`, `.fail_first()`.
pub struct MockAdapter {
    name: String,
    default: Option<StageOutput>,
    by_subject: HashMap<String, StageOutput>,
    always_fail: Option<AdapterError>,
    fail_first: Option<(u32, AdapterError)>,
    failures_served: AtomicU32,
    delay: Option<Duration>,
    panics: bool,
    subjects: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
            by_subject: HashMap::new(),
            always_fail: None,
            fail_first: None,
            failures_served: AtomicU32::new(0),
            delay: None,
            panics: false,
            subjects: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, output: StageOutput) -> Self {
        self.default = Some(output);
        self
    }

    pub fn on_subject(mut self, subject: &str, output: StageOutput) -> Self {
        self.by_subject.insert(subject.to_string(), output);
        self
    }

    pub fn fail_with(mut self, error: AdapterError) -> Self {
        self.always_fail = Some(error);
        self
    }

    pub fn fail_first(mut self, times: u32, error: AdapterError) -> Self {
        self.fail_first = Some((times, error));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic inside `lookup`, to exercise runner isolation.
    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.subjects.lock().unwrap().len()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageAdapter for MockAdapter {
    async fn lookup(&self, query: StageQuery<'_>) -> Result<StageOutput, AdapterError> {
        self.subjects.lock().unwrap().push(query.subject.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("MockAdapter {} panicked for {}", self.name, query.subject);
        }
        if let Some((times, error)) = &self.fail_first {
            if self.failures_served.fetch_add(1, Ordering::SeqCst) < *times {
                return Err(error.clone());
            }
        }
        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }

        self.by_subject
            .get(query.subject)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                AdapterError::Unrecoverable(format!(
                    "MockAdapter: no output registered for {}",
                    query.subject
                ))
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// ScriptedReasoner
// ---------------------------------------------------------------------------

/// Reasoner with a fixed decision (or the rule-based one when none is scripted) and an
/// optional fixed analysis.
pub struct ScriptedReasoner {
    decision: Option<RoutingDecision>,
    decide_error: Option<AdapterError>,
    analysis: Option<OwnershipResult>,
    analysis_fails: bool,
    analyze_calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self {
            decision: None,
            decide_error: None,
            analysis: None,
            analysis_fails: false,
            analyze_calls: AtomicUsize::new(0),
        }
    }

    pub fn decide_with(mut self, decision: RoutingDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn fail_decide(mut self, error: AdapterError) -> Self {
        self.decide_error = Some(error);
        self
    }

    pub fn analysis(mut self, result: OwnershipResult) -> Self {
        self.analysis = Some(result);
        self
    }

    pub fn fail_analysis(mut self) -> Self {
        self.analysis_fails = true;
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn decide(
        &self,
        address: &str,
        evidence: &Evidence,
    ) -> Result<RoutingDecision, AdapterError> {
        if let Some(error) = &self.decide_error {
            return Err(error.clone());
        }
        match &self.decision {
            Some(decision) => Ok(decision.clone()),
            None => RuleBasedReasoner.decide(address, evidence).await,
        }
    }

    async fn analyze(&self, _address: &str, _evidence: &Evidence) -> Result<Option<OwnershipResult>> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if self.analysis_fails {
            anyhow::bail!("ScriptedReasoner: analysis unavailable");
        }
        Ok(self.analysis.clone())
    }
}

// ---------------------------------------------------------------------------
// FailingJobStore
// ---------------------------------------------------------------------------

/// Store whose every call errors. Jobs must still complete in memory.
pub struct FailingJobStore;

#[async_trait]
impl JobStore for FailingJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        anyhow::bail!("FailingJobStore: cannot save {}", job.id)
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<Job>> {
        anyhow::bail!("FailingJobStore: cannot load {job_id}")
    }

    async fn is_connected(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<RunSnapshot>>,
}

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<RunSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn progress(&self, snapshot: RunSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn owner(name: &str, provenance: Provenance) -> OwnerCandidate {
    OwnerCandidate::new(name, provenance)
}

pub fn contact(name: &str, phone: &str) -> ContactCandidate {
    ContactCandidate {
        name: Some(name.to_string()),
        phone: Some(phone.to_string()),
        email: None,
    }
}

pub fn owner_output(name: &str, provenance: Provenance) -> StageOutput {
    StageOutput::default().with_owner(owner(name, provenance))
}

/// Retries without delay and a short per-attempt timeout.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(2))
}

/// Registry for the property-research graph where every lookup stage answers with an
/// empty output unless overridden, and the ownership check uses `reasoner`.
pub struct MockStages {
    adapters: HashMap<StageId, Arc<MockAdapter>>,
    reasoner: Arc<dyn Reasoner>,
}

impl MockStages {
    pub fn new() -> Self {
        let adapters = StageId::ALL
            .into_iter()
            .filter(|s| !matches!(s, StageId::OwnershipCheck | StageId::Analyze))
            .map(|s| {
                (
                    s,
                    Arc::new(MockAdapter::new(s.as_str()).respond(StageOutput::default())),
                )
            })
            .collect();
        Self {
            adapters,
            reasoner: Arc::new(RuleBasedReasoner),
        }
    }

    pub fn stage(mut self, stage: StageId, adapter: MockAdapter) -> Self {
        self.adapters.insert(stage, Arc::new(adapter));
        self
    }

    pub fn reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn adapter(&self, stage: StageId) -> Arc<MockAdapter> {
        self.adapters[&stage].clone()
    }

    pub fn registry(&self) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new().with(
            StageId::OwnershipCheck,
            Arc::new(DecisionStage::new(self.reasoner.clone())),
        );
        for (stage, adapter) in &self.adapters {
            registry.register(*stage, adapter.clone());
        }
        registry
    }

    pub fn runner(&self) -> AddressRunner {
        self.runner_with(property_graph())
    }

    pub fn runner_with(&self, graph: WorkflowGraph) -> AddressRunner {
        AddressRunner::new(
            Arc::new(graph),
            self.registry(),
            fast_retry(),
            ResultAggregator::default(),
            Some(self.reasoner.clone()),
        )
        .expect("mock registry covers the graph")
    }
}

impl Default for MockStages {
    fn default() -> Self {
        Self::new()
    }
}

pub fn property_graph() -> WorkflowGraph {
    property_research_graph().expect("property research graph is valid")
}
