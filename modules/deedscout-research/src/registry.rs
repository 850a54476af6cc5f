use std::collections::HashMap;
use std::sync::Arc;

use deedscout_common::{GraphConfigurationError, StageId};

use crate::graph::{StageKind, WorkflowGraph};
use crate::traits::StageAdapter;

/// Static mapping from stage id to the adapter that serves it. Checked against the graph
/// once, at construction of the runner.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<StageId, Arc<dyn StageAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: StageId, adapter: Arc<dyn StageAdapter>) -> Self {
        self.register(stage, adapter);
        self
    }

    pub fn register(&mut self, stage: StageId, adapter: Arc<dyn StageAdapter>) {
        self.adapters.insert(stage, adapter);
    }

    pub fn get(&self, stage: StageId) -> Option<&Arc<dyn StageAdapter>> {
        self.adapters.get(&stage)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Every lookup and decision stage must have an adapter. The terminal stage is served
    /// by the aggregator and needs none.
    pub fn check(&self, graph: &WorkflowGraph) -> Result<(), GraphConfigurationError> {
        match graph
            .stages()
            .iter()
            .filter(|s| s.kind != StageKind::Terminal)
            .find(|s| !self.adapters.contains_key(&s.id))
        {
            Some(missing) => Err(GraphConfigurationError::MissingAdapter(missing.id)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(StageId, &str)> = self
            .adapters
            .iter()
            .map(|(id, adapter)| (*id, adapter.name()))
            .collect();
        names.sort();
        f.debug_struct("AdapterRegistry")
            .field("adapters", &names)
            .finish()
    }
}
