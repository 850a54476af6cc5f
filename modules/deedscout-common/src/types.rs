use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::names::{infer_owner_type, normalize_owner_name};

// --- Stage identifiers ---

/// Every research stage the workflow graph knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Zoning/land-use registry lookup (registry-listed owner).
    PropertyRegistry,
    /// City land-records search (deeds, mortgages, filed documents).
    LandRecords,
    /// Text extraction over the documents returned by `LandRecords`.
    DocumentProcessing,
    /// Conditional check delegated to the reasoning collaborator.
    OwnershipCheck,
    /// Additional registry lookup, only when earlier evidence is insufficient.
    SupplementalRegistry,
    /// Corporate registry re-resolution of entity owners to a natural person.
    CorporateRegistry,
    SkipTrace,
    PeopleSearch,
    /// Terminal aggregation.
    Analyze,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::PropertyRegistry,
        StageId::LandRecords,
        StageId::DocumentProcessing,
        StageId::OwnershipCheck,
        StageId::SupplementalRegistry,
        StageId::CorporateRegistry,
        StageId::SkipTrace,
        StageId::PeopleSearch,
        StageId::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::PropertyRegistry => "property_registry",
            StageId::LandRecords => "land_records",
            StageId::DocumentProcessing => "document_processing",
            StageId::OwnershipCheck => "ownership_check",
            StageId::SupplementalRegistry => "supplemental_registry",
            StageId::CorporateRegistry => "corporate_registry",
            StageId::SkipTrace => "skip_trace",
            StageId::PeopleSearch => "people_search",
            StageId::Analyze => "analyze",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        StageId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

// --- Evidence ---

/// Where an owner name came from. Ordered strongest first by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Read off a recorded deed or other filed document.
    Document,
    /// Listed by an official property registry.
    Registry,
    /// Inferred, or taken from an aggregator / people-search site.
    Secondary,
}

impl Provenance {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Provenance::Document | Provenance::Registry)
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Document => write!(f, "document"),
            Provenance::Registry => write!(f, "registry"),
            Provenance::Secondary => write!(f, "secondary"),
        }
    }
}

impl std::str::FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" | "deed" => Ok(Provenance::Document),
            "registry" => Ok(Provenance::Registry),
            "secondary" => Ok(Provenance::Secondary),
            other => Err(format!("unknown provenance: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerCandidate {
    pub name: String,
    #[serde(default)]
    pub owner_type: Option<OwnerType>,
    pub provenance: Provenance,
}

impl OwnerCandidate {
    pub fn new(name: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            name: name.into(),
            owner_type: None,
            provenance,
        }
    }

    pub fn with_type(mut self, owner_type: OwnerType) -> Self {
        self.owner_type = Some(owner_type);
        self
    }

    /// Explicit type hint if the source gave one, otherwise inferred from the name.
    pub fn effective_type(&self) -> OwnerType {
        match self.owner_type {
            Some(t) if t != OwnerType::Unknown => t,
            _ => infer_owner_type(&self.name),
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_owner_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactCandidate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExcerpt {
    pub document_id: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// The branch chosen by the ownership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Evidence already names an owner or an entity; go straight to entity handling.
    OwnerResolved,
    /// Evidence is insufficient; run the supplemental registry lookup.
    NeedsSupplementalLookup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: Route,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub owner_type: Option<OwnerType>,
}

impl RoutingDecision {
    pub fn resolved(owner_name: impl Into<String>, owner_type: Option<OwnerType>) -> Self {
        Self {
            route: Route::OwnerResolved,
            owner_name: Some(owner_name.into()),
            owner_type,
        }
    }

    pub fn insufficient() -> Self {
        Self {
            route: Route::NeedsSupplementalLookup,
            owner_name: None,
            owner_type: None,
        }
    }
}

/// Structured output a single stage committed to the evidence map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    #[serde(default)]
    pub owners: Vec<OwnerCandidate>,
    #[serde(default)]
    pub contacts: Vec<ContactCandidate>,
    #[serde(default)]
    pub documents: Vec<DocumentExcerpt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

impl StageOutput {
    pub fn with_owner(mut self, owner: OwnerCandidate) -> Self {
        self.owners.push(owner);
        self
    }

    pub fn with_contact(mut self, contact: ContactCandidate) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_document(mut self, document: DocumentExcerpt) -> Self {
        self.documents.push(document);
        self
    }

    pub fn with_routing(mut self, decision: RoutingDecision) -> Self {
        self.routing = Some(decision);
        self
    }
}

/// Append-only map of stage → committed output for one address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence {
    stages: BTreeMap<StageId, StageOutput>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a stage's output. Returns `false` (and leaves the existing entry untouched)
    /// if the stage already committed.
    pub fn commit(&mut self, stage: StageId, output: StageOutput) -> bool {
        if self.stages.contains_key(&stage) {
            return false;
        }
        self.stages.insert(stage, output);
        true
    }

    pub fn get(&self, stage: StageId) -> Option<&StageOutput> {
        self.stages.get(&stage)
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.stages.contains_key(&stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageId, &StageOutput)> {
        self.stages.iter().map(|(id, out)| (*id, out))
    }

    /// Every owner candidate with the stage that produced it.
    pub fn owner_candidates(&self) -> impl Iterator<Item = (StageId, &OwnerCandidate)> {
        self.iter()
            .flat_map(|(id, out)| out.owners.iter().map(move |o| (id, o)))
    }

    pub fn contacts(&self) -> impl Iterator<Item = (StageId, &ContactCandidate)> {
        self.iter()
            .flat_map(|(id, out)| out.contacts.iter().map(move |c| (id, c)))
    }

    pub fn routing(&self) -> Option<&RoutingDecision> {
        self.iter().find_map(|(_, out)| out.routing.as_ref())
    }

    pub fn has_documents(&self, stage: StageId) -> bool {
        self.get(stage).is_some_and(|out| !out.documents.is_empty())
    }

    /// True when any stage named an owner, or the routing decision extracted one.
    pub fn has_owner_reference(&self) -> bool {
        self.owner_candidates()
            .any(|(_, o)| !o.normalized_name().is_empty())
            || self
                .routing()
                .and_then(|d| d.owner_name.as_deref())
                .is_some_and(|n| !n.trim().is_empty())
    }

    /// The owner as currently understood mid-pipeline: the routing decision's extracted
    /// owner when present, otherwise the strongest-provenance candidate in stage order.
    /// Independent of the order stages committed in.
    pub fn current_owner(&self) -> Option<OwnerCandidate> {
        if let Some(decision) = self.routing() {
            if let Some(name) = decision.owner_name.as_deref().filter(|n| !n.trim().is_empty()) {
                let mut candidate = OwnerCandidate::new(name, Provenance::Secondary);
                candidate.owner_type = decision.owner_type;
                return Some(candidate);
            }
        }
        self.owner_candidates()
            .filter(|(id, o)| *id != StageId::CorporateRegistry && !o.normalized_name().is_empty())
            .min_by_key(|(id, o)| (o.provenance, *id))
            .map(|(_, o)| o.clone())
    }
}

// --- Outcome types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Individual,
    Llc,
    Corporation,
    Unknown,
}

impl OwnerType {
    pub fn is_entity(&self) -> bool {
        matches!(self, OwnerType::Llc | OwnerType::Corporation)
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerType::Individual => write!(f, "individual"),
            OwnerType::Llc => write!(f, "llc"),
            OwnerType::Corporation => write!(f, "corporation"),
            OwnerType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipResult {
    pub owner_name: String,
    pub owner_type: OwnerType,
    pub contact_number: Option<String>,
    pub confidence: Confidence,
}

impl OwnershipResult {
    /// The result for an address where nothing could be resolved.
    pub fn unresolved() -> Self {
        Self {
            owner_name: "Unknown".to_string(),
            owner_type: OwnerType::Unknown,
            contact_number: None,
            confidence: Confidence::Low,
        }
    }
}

// --- Job model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

/// How a stage settled for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Per-address ledger of settled stages.
pub type StageLedger = BTreeMap<StageId, StageOutcome>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressTask {
    pub address: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub stages: StageLedger,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub result: Option<OwnershipResult>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl AddressTask {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: TaskStatus::Pending,
            evidence: Evidence::new(),
            stages: StageLedger::new(),
            errors: Vec::new(),
            result: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_addresses: usize,
    pub completed_addresses: usize,
    pub tasks: Vec<AddressTask>,
}

impl Job {
    pub fn new(addresses: Vec<String>) -> Self {
        let now = Utc::now();
        let tasks: Vec<AddressTask> = addresses.into_iter().map(AddressTask::new).collect();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            total_addresses: tasks.len(),
            completed_addresses: 0,
            tasks,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_id_round_trips_through_str() {
        for id in StageId::ALL {
            assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
        }
        assert_eq!("PEOPLE_SEARCH".parse::<StageId>().unwrap(), StageId::PeopleSearch);
        assert!("zola".parse::<StageId>().is_err());
    }

    #[test]
    fn evidence_commit_is_write_once() {
        let mut evidence = Evidence::new();
        let first = StageOutput::default()
            .with_owner(OwnerCandidate::new("JANE DOE", Provenance::Registry));
        assert!(evidence.commit(StageId::PropertyRegistry, first.clone()));

        let second = StageOutput::default()
            .with_owner(OwnerCandidate::new("SOMEONE ELSE", Provenance::Registry));
        assert!(!evidence.commit(StageId::PropertyRegistry, second));

        assert_eq!(evidence.get(StageId::PropertyRegistry), Some(&first));
        assert_eq!(evidence.len(), 1);
    }

    #[test]
    fn current_owner_prefers_routing_extraction() {
        let mut evidence = Evidence::new();
        evidence.commit(
            StageId::PropertyRegistry,
            StageOutput::default().with_owner(OwnerCandidate::new("ACME", Provenance::Registry)),
        );
        evidence.commit(
            StageId::OwnershipCheck,
            StageOutput::default()
                .with_routing(RoutingDecision::resolved("ACME HOLDINGS LLC", Some(OwnerType::Llc))),
        );

        let owner = evidence.current_owner().unwrap();
        assert_eq!(owner.name, "ACME HOLDINGS LLC");
        assert_eq!(owner.effective_type(), OwnerType::Llc);
    }

    #[test]
    fn current_owner_ignores_commit_order() {
        let registry =
            StageOutput::default().with_owner(OwnerCandidate::new("JOHN SMITH", Provenance::Registry));
        let deed = StageOutput::default()
            .with_owner(OwnerCandidate::new("JOHN Q SMITH", Provenance::Document));

        let mut a = Evidence::new();
        a.commit(StageId::PropertyRegistry, registry.clone());
        a.commit(StageId::DocumentProcessing, deed.clone());

        let mut b = Evidence::new();
        b.commit(StageId::DocumentProcessing, deed);
        b.commit(StageId::PropertyRegistry, registry);

        assert_eq!(a.current_owner(), b.current_owner());
        assert_eq!(a.current_owner().unwrap().name, "JOHN Q SMITH");
    }

    #[test]
    fn new_job_starts_pending_with_pending_tasks() {
        let job = Job::new(vec!["1 MAIN ST".into(), "2 MAIN ST".into()]);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_addresses, 2);
        assert_eq!(job.completed_addresses, 0);
        assert!(job.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn job_serializes_snake_case_statuses() {
        let job = Job::new(vec!["1 MAIN ST".into()]);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["tasks"][0]["status"], "pending");
        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
