pub mod aggregator;
pub mod executor;
pub mod graph;
pub mod jobs;
pub mod reasoner;
pub mod registry;
pub mod runner;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aggregator::{Aggregation, ResultAggregator};
pub use executor::{RetryPolicy, StageError, StageExecutor};
pub use graph::{
    property_research_graph, Execution, Frontier, Gate, StageKind, StageSpec, Subject,
    WorkflowGraph,
};
pub use jobs::{JobManager, ResearchConfig, TaskOutcome};
pub use reasoner::{DecisionStage, RuleBasedReasoner};
pub use registry::AdapterRegistry;
pub use runner::{AddressRunner, NoProgress, ProgressSink, RunReport, RunSnapshot};
pub use store::{MemoryJobStore, PgJobStore};
pub use traits::{AdapterError, JobStore, Reasoner, StageAdapter, StageQuery};
