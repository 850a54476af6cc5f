//! Folds an address's evidence into one `OwnershipResult`.
//!
//! Candidates are grouped by normalized name. The winning group has the strongest
//! provenance (per the configured precedence), then the most independent stages behind it,
//! then the earliest stage. Confidence is banded from how many independent stages agree:
//! two or more is `high`, a single authoritative stage is `medium`, anything else is `low`.
//! An `unknown` owner type is always `low`.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use tracing::{debug, warn};

use deedscout_common::names::{
    clean_phone, display_owner_name, format_phone, infer_owner_type, normalize_owner_name,
};
use deedscout_common::{
    Confidence, Evidence, OwnerType, OwnershipResult, Provenance, StageId,
};

use crate::traits::Reasoner;

/// A deterministic result, and whether it was contested.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub result: OwnershipResult,
    /// No candidates at all, or several names share the top precedence.
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    precedence: Vec<Provenance>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(vec![
            Provenance::Document,
            Provenance::Registry,
            Provenance::Secondary,
        ])
    }
}

struct NameGroup {
    normalized: String,
    /// Display form of the best-ranked candidate in the group.
    display: String,
    best_rank: usize,
    /// Stages that produced this name from their own lookup.
    independent: BTreeSet<StageId>,
    authoritative: BTreeSet<StageId>,
    first_stage: StageId,
    type_hint: Option<(usize, OwnerType)>,
}

struct PhoneTally {
    digits: String,
    names_owner: bool,
    sources: BTreeSet<StageId>,
    first_stage: StageId,
}

impl ResultAggregator {
    pub fn new(precedence: Vec<Provenance>) -> Self {
        Self { precedence }
    }

    fn rank(&self, provenance: Provenance) -> usize {
        self.precedence
            .iter()
            .position(|p| *p == provenance)
            .unwrap_or(self.precedence.len())
    }

    pub fn aggregate(&self, evidence: &Evidence) -> Aggregation {
        let groups = self.group_candidates(evidence);

        let Some(winner) = groups.iter().min_by_key(|g| {
            (g.best_rank, Reverse(g.independent.len()), g.first_stage)
        }) else {
            return Aggregation {
                result: OwnershipResult::unresolved(),
                ambiguous: true,
            };
        };

        let contested = groups
            .iter()
            .any(|g| g.normalized != winner.normalized && g.best_rank == winner.best_rank);

        let mut owner_name = winner.display.clone();
        let mut owner_type = winner
            .type_hint
            .map(|(_, t)| t)
            .unwrap_or_else(|| infer_owner_type(&owner_name));

        let mut confidence = match winner.independent.len() {
            n if n >= 2 => Confidence::High,
            1 if winner.authoritative.len() == 1 => Confidence::Medium,
            _ => Confidence::Low,
        };
        if owner_type == OwnerType::Unknown {
            confidence = Confidence::Low;
        }

        let mut known_names = vec![winner.normalized.clone()];
        if owner_type.is_entity() {
            if let Some(person) = corporate_person(evidence) {
                debug!(entity = %owner_name, person = %person, "Entity re-resolved to a person");
                known_names.push(normalize_owner_name(&person));
                owner_name = person;
                owner_type = OwnerType::Individual;
            }
        }

        let contact_number = best_phone(evidence, &known_names);

        Aggregation {
            result: OwnershipResult {
                owner_name,
                owner_type,
                contact_number,
                confidence,
            },
            ambiguous: contested,
        }
    }

    /// Deterministic aggregation, with the analysis collaborator consulted only when the
    /// evidence is ambiguous. A failing or silent collaborator leaves the deterministic
    /// result in place.
    pub async fn finalize(
        &self,
        address: &str,
        evidence: &Evidence,
        reasoner: Option<&dyn Reasoner>,
    ) -> OwnershipResult {
        let aggregation = self.aggregate(evidence);
        if !aggregation.ambiguous {
            return aggregation.result;
        }
        let Some(reasoner) = reasoner else {
            return aggregation.result;
        };

        match reasoner.analyze(address, evidence).await {
            Ok(Some(judged)) => {
                debug!(address, owner = %judged.owner_name, "Using analysis for ambiguous evidence");
                sanitize(judged)
            }
            Ok(None) => aggregation.result,
            Err(e) => {
                warn!(address, error = %e, "Analysis failed, keeping deterministic result");
                aggregation.result
            }
        }
    }

    fn group_candidates(&self, evidence: &Evidence) -> Vec<NameGroup> {
        let mut groups: Vec<NameGroup> = Vec::new();

        let mut add = |stage: StageId,
                       name: &str,
                       provenance: Provenance,
                       hint: Option<OwnerType>,
                       independent: bool| {
            let normalized = normalize_owner_name(name);
            if normalized.is_empty() {
                return;
            }
            let rank = self.rank(provenance);
            let idx = match groups.iter().position(|g| g.normalized == normalized) {
                Some(idx) => idx,
                None => {
                    groups.push(NameGroup {
                        normalized,
                        display: display_owner_name(name),
                        best_rank: rank,
                        independent: BTreeSet::new(),
                        authoritative: BTreeSet::new(),
                        first_stage: stage,
                        type_hint: None,
                    });
                    groups.len() - 1
                }
            };
            let group = &mut groups[idx];
            if rank < group.best_rank {
                group.display = display_owner_name(name);
                group.best_rank = rank;
            }
            group.first_stage = group.first_stage.min(stage);
            if independent {
                group.independent.insert(stage);
                if provenance.is_authoritative() {
                    group.authoritative.insert(stage);
                }
            }
            if let Some(hint) = hint.filter(|t| *t != OwnerType::Unknown) {
                if group.type_hint.map_or(true, |(r, _)| rank < r) {
                    group.type_hint = Some((rank, hint));
                }
            }
        };

        for (stage, candidate) in evidence.owner_candidates() {
            // Corporate registry output re-resolves an entity; it is not an owner claim.
            if stage == StageId::CorporateRegistry {
                continue;
            }
            add(
                stage,
                &candidate.name,
                candidate.provenance,
                candidate.owner_type,
                true,
            );
        }

        // The ownership check only restates earlier evidence, so its extraction never
        // counts as an independent source.
        for (stage, output) in evidence.iter() {
            if let Some(name) = output.routing.as_ref().and_then(|d| d.owner_name.as_deref()) {
                let hint = output.routing.as_ref().and_then(|d| d.owner_type);
                add(stage, name, Provenance::Secondary, hint, false);
            }
        }

        groups
    }
}

fn corporate_person(evidence: &Evidence) -> Option<String> {
    evidence
        .get(StageId::CorporateRegistry)?
        .owners
        .iter()
        .filter(|c| c.effective_type() == OwnerType::Individual)
        .map(|c| display_owner_name(&c.name))
        .find(|n| !n.is_empty())
}

/// Pick one phone number: ones listed under the owner's name first, then the number most
/// stages agree on, then stage order.
fn best_phone(evidence: &Evidence, owner_names: &[String]) -> Option<String> {
    let mut tallies: Vec<PhoneTally> = Vec::new();

    for (stage, contact) in evidence.contacts() {
        let Some(digits) = contact.phone.as_deref().and_then(clean_phone) else {
            continue;
        };
        let names_owner = contact
            .name
            .as_deref()
            .map(normalize_owner_name)
            .is_some_and(|n| owner_names.contains(&n));

        match tallies.iter_mut().find(|t| t.digits == digits) {
            Some(tally) => {
                tally.names_owner |= names_owner;
                tally.sources.insert(stage);
                tally.first_stage = tally.first_stage.min(stage);
            }
            None => tallies.push(PhoneTally {
                digits,
                names_owner,
                sources: BTreeSet::from([stage]),
                first_stage: stage,
            }),
        }
    }

    tallies
        .into_iter()
        .min_by_key(|t| (Reverse(t.names_owner), Reverse(t.sources.len()), t.first_stage))
        .map(|t| format_phone(&t.digits))
}

/// Hold an external judgement to the same output rules as the deterministic path.
fn sanitize(judged: OwnershipResult) -> OwnershipResult {
    let owner_name = judged.owner_name.trim().to_string();
    if owner_name.is_empty() || owner_name.eq_ignore_ascii_case("unknown") {
        return OwnershipResult::unresolved();
    }
    let contact_number = judged
        .contact_number
        .as_deref()
        .and_then(clean_phone)
        .map(|d| format_phone(&d));
    let confidence = if judged.owner_type == OwnerType::Unknown {
        Confidence::Low
    } else {
        judged.confidence
    };

    OwnershipResult {
        owner_name,
        owner_type: judged.owner_type,
        contact_number,
        confidence,
    }
}
