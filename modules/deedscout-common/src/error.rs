use thiserror::Error;
use uuid::Uuid;

use crate::types::StageId;

#[derive(Error, Debug)]
pub enum DeedScoutError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Graph configuration error: {0}")]
    GraphConfiguration(#[from] GraphConfigurationError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Static problems in a workflow declaration. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphConfigurationError {
    #[error("stage {0} declared more than once")]
    DuplicateStage(StageId),

    #[error("stage {stage} depends on undeclared stage {dependency}")]
    UnknownDependency { stage: StageId, dependency: StageId },

    #[error("cycle in stage declarations: {}", format_path(.0))]
    Cycle(Vec<StageId>),

    #[error("no terminal stage declared")]
    MissingTerminal,

    #[error("more than one terminal stage declared: {}", format_path(.0))]
    MultipleTerminals(Vec<StageId>),

    #[error("terminal stage {0} has dependents")]
    TerminalHasDependents(StageId),

    #[error("terminal stage is unreachable from stage {0}")]
    UnreachableTerminal(StageId),

    #[error("no adapter registered for stage {0}")]
    MissingAdapter(StageId),
}

fn format_path(path: &[StageId]) -> String {
    path.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
