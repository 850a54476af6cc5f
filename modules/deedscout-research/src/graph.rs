//! Workflow graph: stage declarations, AND-joins, gates, and the pure frontier function.
//!
//! A stage is *ready* once every dependency has settled (completed, failed, or skipped).
//! A ready stage whose gate holds over the current evidence is *eligible*; a ready stage
//! whose gate fails is *skipped*. Failed stages count as settled with empty evidence, so a
//! bad lookup never blocks its dependents.
//!
//! Gates only read the evidence map, never the order stages committed in, so concurrent
//! fan-out stages can finish in any order without changing the route taken.

use std::collections::{HashMap, HashSet};

use deedscout_common::{
    Evidence, GraphConfigurationError, OwnerType, Route, StageId, StageLedger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Calls a data-source adapter.
    Lookup,
    /// Calls the reasoning collaborator; its output carries a routing decision.
    Decision,
    /// Aggregation. Exactly one per graph, with no dependents.
    Terminal,
}

/// What the adapter is asked to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Address,
    /// The owner as currently resolved (individual or entity).
    Owner,
    /// A natural person: the corporate registry's re-resolution, or an individual owner.
    Person,
}

/// How a stage runs alongside other stages that became eligible in the same wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Concurrent,
    /// Runs alone, after the wave's concurrent stages.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Always,
    /// The given stage committed at least one document.
    HasDocuments(StageId),
    /// The ownership check chose this route.
    Route(Route),
    /// The current owner is an LLC or corporation.
    EntityOwner,
    /// A natural person's name is available to search for.
    PersonResolved,
}

impl Gate {
    pub fn evaluate(&self, evidence: &Evidence) -> bool {
        match self {
            Gate::Always => true,
            Gate::HasDocuments(stage) => evidence.has_documents(*stage),
            Gate::Route(route) => route_of(evidence) == *route,
            Gate::EntityOwner => evidence
                .current_owner()
                .is_some_and(|o| o.effective_type().is_entity()),
            Gate::PersonResolved => resolved_person(evidence).is_some(),
        }
    }
}

/// The route the ownership check chose. If the check produced no decision (it failed, or
/// has not run) fall back to whether any owner reference exists at all.
pub fn route_of(evidence: &Evidence) -> Route {
    match evidence.routing() {
        Some(decision) => decision.route,
        None if evidence.has_owner_reference() => Route::OwnerResolved,
        None => Route::NeedsSupplementalLookup,
    }
}

/// A natural person to run name searches against.
pub fn resolved_person(evidence: &Evidence) -> Option<String> {
    let from_registry = evidence.get(StageId::CorporateRegistry).and_then(|out| {
        out.owners
            .iter()
            .find(|o| o.effective_type() == OwnerType::Individual)
            .map(|o| o.name.clone())
    });
    if from_registry.is_some() {
        return from_registry;
    }
    evidence
        .current_owner()
        .filter(|o| o.effective_type() == OwnerType::Individual)
        .map(|o| o.name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub id: StageId,
    pub kind: StageKind,
    pub depends_on: Vec<StageId>,
    pub gate: Gate,
    pub subject: Subject,
    pub execution: Execution,
}

impl StageSpec {
    fn new(id: StageId, kind: StageKind) -> Self {
        Self {
            id,
            kind,
            depends_on: Vec::new(),
            gate: Gate::Always,
            subject: Subject::Address,
            execution: Execution::Concurrent,
        }
    }

    pub fn lookup(id: StageId) -> Self {
        Self::new(id, StageKind::Lookup)
    }

    pub fn decision(id: StageId) -> Self {
        Self::new(id, StageKind::Decision)
    }

    pub fn terminal(id: StageId) -> Self {
        Self::new(id, StageKind::Terminal)
    }

    pub fn after(mut self, deps: &[StageId]) -> Self {
        self.depends_on = deps.to_vec();
        self
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.execution = Execution::Sequential;
        self
    }
}

/// Stages that settle in one frontier computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    pub eligible: Vec<StageId>,
    pub skipped: Vec<StageId>,
}

impl Frontier {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty() && self.skipped.is_empty()
    }
}

/// A validated, acyclic stage graph with stages held in topological order.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    stages: Vec<StageSpec>,
    index: HashMap<StageId, usize>,
    terminal: StageId,
}

impl WorkflowGraph {
    /// Validate declarations and order them. Every structural problem is reported here,
    /// never at run time.
    pub fn new(specs: Vec<StageSpec>) -> Result<Self, GraphConfigurationError> {
        let mut declared = HashSet::new();
        for spec in &specs {
            if !declared.insert(spec.id) {
                return Err(GraphConfigurationError::DuplicateStage(spec.id));
            }
        }
        for spec in &specs {
            if let Some(dep) = spec.depends_on.iter().find(|d| !declared.contains(d)) {
                return Err(GraphConfigurationError::UnknownDependency {
                    stage: spec.id,
                    dependency: *dep,
                });
            }
        }

        if let Some(cycle) = find_cycle(&specs) {
            return Err(GraphConfigurationError::Cycle(cycle));
        }

        let terminals: Vec<StageId> = specs
            .iter()
            .filter(|s| s.kind == StageKind::Terminal)
            .map(|s| s.id)
            .collect();
        let terminal = match terminals.as_slice() {
            [] => return Err(GraphConfigurationError::MissingTerminal),
            [only] => *only,
            _ => return Err(GraphConfigurationError::MultipleTerminals(terminals)),
        };
        if specs.iter().any(|s| s.depends_on.contains(&terminal)) {
            return Err(GraphConfigurationError::TerminalHasDependents(terminal));
        }

        // Everything must feed the terminal, or its output would never be aggregated.
        let feeds_terminal = ancestors(&specs, terminal);
        if let Some(stray) = specs
            .iter()
            .find(|s| s.id != terminal && !feeds_terminal.contains(&s.id))
        {
            return Err(GraphConfigurationError::UnreachableTerminal(stray.id));
        }

        let stages = topological_order(specs);
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id, i))
            .collect();

        Ok(Self {
            stages,
            index,
            terminal,
        })
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn spec(&self, id: StageId) -> Option<&StageSpec> {
        self.index.get(&id).map(|&i| &self.stages[i])
    }

    pub fn terminal(&self) -> StageId {
        self.terminal
    }

    /// Position in topological order; used to break ties deterministically.
    pub fn rank(&self, id: StageId) -> usize {
        self.index.get(&id).copied().unwrap_or(usize::MAX)
    }

    /// Stages with no dependencies: eligible as soon as a run starts.
    pub fn initial(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id)
            .collect()
    }

    /// Everything that can settle given the ledger and evidence. Skips cascade within a
    /// single call: a stage whose only dependency was just skipped is evaluated too.
    pub fn frontier(&self, ledger: &StageLedger, evidence: &Evidence) -> Frontier {
        let mut frontier = Frontier::default();
        let mut settled: HashSet<StageId> = ledger.keys().copied().collect();

        for spec in &self.stages {
            if settled.contains(&spec.id) {
                continue;
            }
            if !spec.depends_on.iter().all(|d| settled.contains(d)) {
                continue;
            }
            if spec.gate.evaluate(evidence) {
                frontier.eligible.push(spec.id);
            } else {
                frontier.skipped.push(spec.id);
                settled.insert(spec.id);
            }
        }

        frontier
    }

    /// Stages downstream of `after` that are eligible now. Empty once the run is terminal.
    pub fn next_stages(
        &self,
        after: StageId,
        ledger: &StageLedger,
        evidence: &Evidence,
    ) -> Vec<StageId> {
        self.frontier(ledger, evidence)
            .eligible
            .into_iter()
            .filter(|id| {
                self.spec(*id)
                    .is_some_and(|s| s.depends_on.contains(&after))
            })
            .collect()
    }
}

/// The property-research workflow.
///
/// ```text
/// property_registry ─────────────────────────┐
/// land_records ── document_processing ───────┴─ ownership_check ─ supplemental_registry
///   ─ corporate_registry ─┬─ skip_trace ────┬─ analyze
///                         └─ people_search ─┘
/// ```
pub fn property_research_graph() -> Result<WorkflowGraph, GraphConfigurationError> {
    use StageId::*;

    WorkflowGraph::new(vec![
        StageSpec::lookup(PropertyRegistry),
        StageSpec::lookup(LandRecords),
        StageSpec::lookup(DocumentProcessing)
            .after(&[LandRecords])
            .gate(Gate::HasDocuments(LandRecords)),
        StageSpec::decision(OwnershipCheck).after(&[PropertyRegistry, DocumentProcessing]),
        StageSpec::lookup(SupplementalRegistry)
            .after(&[OwnershipCheck])
            .gate(Gate::Route(Route::NeedsSupplementalLookup)),
        StageSpec::lookup(CorporateRegistry)
            .after(&[OwnershipCheck, SupplementalRegistry])
            .gate(Gate::EntityOwner)
            .subject(Subject::Owner),
        StageSpec::lookup(SkipTrace)
            .after(&[CorporateRegistry])
            .gate(Gate::PersonResolved)
            .subject(Subject::Person),
        StageSpec::lookup(PeopleSearch)
            .after(&[CorporateRegistry])
            .gate(Gate::PersonResolved)
            .subject(Subject::Person),
        StageSpec::terminal(Analyze).after(&[SkipTrace, PeopleSearch]),
    ])
}

/// Depth-first search for a dependency cycle. Returns the cycle as a path that starts and
/// ends on the same stage.
fn find_cycle(specs: &[StageSpec]) -> Option<Vec<StageId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: StageId,
        deps: &HashMap<StageId, &[StageId]>,
        marks: &mut HashMap<StageId, Mark>,
        path: &mut Vec<StageId>,
    ) -> Option<Vec<StageId>> {
        match marks.get(&id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(id);
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(id, Mark::Visiting);
        path.push(id);
        for dep in deps.get(&id).copied().unwrap_or_default() {
            if let Some(cycle) = visit(*dep, deps, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let deps: HashMap<StageId, &[StageId]> = specs
        .iter()
        .map(|s| (s.id, s.depends_on.as_slice()))
        .collect();
    let mut marks = HashMap::new();
    let mut path = Vec::new();

    specs
        .iter()
        .find_map(|s| visit(s.id, &deps, &mut marks, &mut path))
}

/// All stages the target (transitively) depends on.
fn ancestors(specs: &[StageSpec], target: StageId) -> HashSet<StageId> {
    let deps: HashMap<StageId, &[StageId]> = specs
        .iter()
        .map(|s| (s.id, s.depends_on.as_slice()))
        .collect();
    let mut seen = HashSet::new();
    let mut stack = vec![target];
    while let Some(id) = stack.pop() {
        for dep in deps.get(&id).copied().unwrap_or_default() {
            if seen.insert(*dep) {
                stack.push(*dep);
            }
        }
    }
    seen
}

/// Kahn's algorithm, stable with respect to declaration order. Input must be acyclic.
fn topological_order(specs: Vec<StageSpec>) -> Vec<StageSpec> {
    let mut remaining = specs;
    let mut ordered: Vec<StageSpec> = Vec::with_capacity(remaining.len());
    let mut placed: HashSet<StageId> = HashSet::new();

    while !remaining.is_empty() {
        let Some(pos) = remaining
            .iter()
            .position(|s| s.depends_on.iter().all(|d| placed.contains(d)))
        else {
            break;
        };
        let spec = remaining.remove(pos);
        placed.insert(spec.id);
        ordered.push(spec);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use deedscout_common::{
        DocumentExcerpt, OwnerCandidate, Provenance, RoutingDecision, StageOutcome, StageOutput,
    };
    use StageId::*;

    fn settle(ledger: &mut StageLedger, ids: &[StageId], outcome: StageOutcome) {
        for id in ids {
            ledger.insert(*id, outcome);
        }
    }

    #[test]
    fn default_graph_validates() {
        let graph = property_research_graph().unwrap();
        assert_eq!(graph.terminal(), Analyze);
        assert_eq!(graph.initial(), vec![PropertyRegistry, LandRecords]);
        assert_eq!(graph.stages().len(), 9);
    }

    #[test]
    fn detects_cycles_with_path() {
        let err = WorkflowGraph::new(vec![
            StageSpec::lookup(PropertyRegistry).after(&[PeopleSearch]),
            StageSpec::lookup(LandRecords).after(&[PropertyRegistry]),
            StageSpec::lookup(PeopleSearch).after(&[LandRecords]),
            StageSpec::terminal(Analyze).after(&[PeopleSearch]),
        ])
        .unwrap_err();

        match err {
            GraphConfigurationError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_self_dependency() {
        let err = WorkflowGraph::new(vec![
            StageSpec::lookup(PropertyRegistry).after(&[PropertyRegistry]),
            StageSpec::terminal(Analyze).after(&[PropertyRegistry]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphConfigurationError::Cycle(vec![PropertyRegistry, PropertyRegistry])
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = WorkflowGraph::new(vec![
            StageSpec::lookup(DocumentProcessing).after(&[LandRecords]),
            StageSpec::terminal(Analyze).after(&[DocumentProcessing]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphConfigurationError::UnknownDependency {
                stage: DocumentProcessing,
                dependency: LandRecords
            }
        );
    }

    #[test]
    fn rejects_missing_and_duplicate_terminals() {
        assert_eq!(
            WorkflowGraph::new(vec![StageSpec::lookup(PropertyRegistry)]).unwrap_err(),
            GraphConfigurationError::MissingTerminal
        );
        assert!(matches!(
            WorkflowGraph::new(vec![
                StageSpec::terminal(Analyze),
                StageSpec::terminal(OwnershipCheck),
            ])
            .unwrap_err(),
            GraphConfigurationError::MultipleTerminals(_)
        ));
    }

    #[test]
    fn rejects_stage_that_never_reaches_terminal() {
        let err = WorkflowGraph::new(vec![
            StageSpec::lookup(PropertyRegistry),
            StageSpec::lookup(LandRecords),
            StageSpec::terminal(Analyze).after(&[PropertyRegistry]),
        ])
        .unwrap_err();
        assert_eq!(err, GraphConfigurationError::UnreachableTerminal(LandRecords));
    }

    #[test]
    fn rejects_terminal_with_dependents() {
        let err = WorkflowGraph::new(vec![
            StageSpec::terminal(Analyze),
            StageSpec::lookup(PeopleSearch).after(&[Analyze]),
        ])
        .unwrap_err();
        assert_eq!(err, GraphConfigurationError::TerminalHasDependents(Analyze));
    }

    #[test]
    fn declaration_order_does_not_matter() {
        let graph = WorkflowGraph::new(vec![
            StageSpec::terminal(Analyze).after(&[DocumentProcessing]),
            StageSpec::lookup(DocumentProcessing).after(&[LandRecords]),
            StageSpec::lookup(LandRecords),
        ])
        .unwrap();
        let order: Vec<StageId> = graph.stages().iter().map(|s| s.id).collect();
        assert_eq!(order, vec![LandRecords, DocumentProcessing, Analyze]);
    }

    #[test]
    fn ownership_check_waits_for_both_branches() {
        let graph = property_research_graph().unwrap();
        let mut ledger = StageLedger::new();
        let mut evidence = Evidence::new();

        assert_eq!(
            graph.frontier(&ledger, &evidence).eligible,
            vec![PropertyRegistry, LandRecords]
        );

        // Registry finishes first; land records still outstanding.
        evidence.commit(
            PropertyRegistry,
            StageOutput::default().with_owner(OwnerCandidate::new("JANE DOE", Provenance::Registry)),
        );
        settle(&mut ledger, &[PropertyRegistry], StageOutcome::Completed);
        assert_eq!(graph.frontier(&ledger, &evidence).eligible, vec![LandRecords]);
        assert!(graph.next_stages(PropertyRegistry, &ledger, &evidence).is_empty());

        // Land records with documents → document processing, still no join.
        evidence.commit(
            LandRecords,
            StageOutput::default().with_document(DocumentExcerpt {
                document_id: "2019000123".into(),
                doc_type: Some("DEED".into()),
                text: String::new(),
            }),
        );
        settle(&mut ledger, &[LandRecords], StageOutcome::Completed);
        assert_eq!(
            graph.next_stages(LandRecords, &ledger, &evidence),
            vec![DocumentProcessing]
        );

        settle(&mut ledger, &[DocumentProcessing], StageOutcome::Completed);
        assert_eq!(
            graph.next_stages(DocumentProcessing, &ledger, &evidence),
            vec![OwnershipCheck]
        );
    }

    #[test]
    fn document_processing_skipped_without_documents() {
        let graph = property_research_graph().unwrap();
        let mut ledger = StageLedger::new();
        let evidence = Evidence::new();
        settle(&mut ledger, &[PropertyRegistry], StageOutcome::Completed);
        settle(&mut ledger, &[LandRecords], StageOutcome::Failed);

        let frontier = graph.frontier(&ledger, &evidence);
        assert_eq!(frontier.skipped, vec![DocumentProcessing]);
        // The skip cascades into the join in the same computation.
        assert_eq!(frontier.eligible, vec![OwnershipCheck]);
    }

    #[test]
    fn routing_decision_selects_branch() {
        let graph = property_research_graph().unwrap();
        let mut ledger = StageLedger::new();
        settle(
            &mut ledger,
            &[PropertyRegistry, LandRecords, DocumentProcessing, OwnershipCheck],
            StageOutcome::Completed,
        );

        let mut insufficient = Evidence::new();
        insufficient.commit(
            OwnershipCheck,
            StageOutput::default().with_routing(RoutingDecision::insufficient()),
        );
        assert_eq!(
            graph.frontier(&ledger, &insufficient).eligible,
            vec![SupplementalRegistry]
        );

        let mut resolved = Evidence::new();
        resolved.commit(
            OwnershipCheck,
            StageOutput::default()
                .with_routing(RoutingDecision::resolved("ACME HOLDINGS LLC", Some(OwnerType::Llc))),
        );
        let frontier = graph.frontier(&ledger, &resolved);
        assert_eq!(frontier.skipped, vec![SupplementalRegistry]);
        assert_eq!(frontier.eligible, vec![CorporateRegistry]);
    }

    #[test]
    fn individual_owner_skips_corporate_registry() {
        let graph = property_research_graph().unwrap();
        let mut ledger = StageLedger::new();
        settle(
            &mut ledger,
            &[PropertyRegistry, LandRecords, DocumentProcessing, OwnershipCheck],
            StageOutcome::Completed,
        );
        let mut evidence = Evidence::new();
        evidence.commit(
            OwnershipCheck,
            StageOutput::default().with_routing(RoutingDecision::resolved(
                "JANE DOE",
                Some(OwnerType::Individual),
            )),
        );

        let frontier = graph.frontier(&ledger, &evidence);
        assert_eq!(frontier.skipped, vec![SupplementalRegistry, CorporateRegistry]);
        assert_eq!(frontier.eligible, vec![SkipTrace, PeopleSearch]);
    }

    #[test]
    fn missing_decision_falls_back_to_owner_reference() {
        let mut evidence = Evidence::new();
        assert_eq!(route_of(&evidence), Route::NeedsSupplementalLookup);

        evidence.commit(
            PropertyRegistry,
            StageOutput::default().with_owner(OwnerCandidate::new("JANE DOE", Provenance::Registry)),
        );
        assert_eq!(route_of(&evidence), Route::OwnerResolved);
    }

    #[test]
    fn corporate_registry_person_is_the_search_subject() {
        let mut evidence = Evidence::new();
        evidence.commit(
            PropertyRegistry,
            StageOutput::default()
                .with_owner(OwnerCandidate::new("ACME HOLDINGS LLC", Provenance::Registry)),
        );
        assert_eq!(resolved_person(&evidence), None);

        evidence.commit(
            CorporateRegistry,
            StageOutput::default().with_owner(
                OwnerCandidate::new("JOHN SMITH", Provenance::Registry)
                    .with_type(OwnerType::Individual),
            ),
        );
        assert_eq!(resolved_person(&evidence).as_deref(), Some("JOHN SMITH"));
    }
}
