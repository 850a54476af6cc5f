use serde::{Deserialize, Serialize};

use deedscout_common::{Evidence, OwnershipResult, StageId};

/// Body posted to a stage service.
#[derive(Debug, Serialize)]
pub struct StageRequest<'a> {
    pub stage: StageId,
    pub address: &'a str,
    pub subject: &'a str,
    pub evidence: &'a Evidence,
}

/// Body posted to the reasoning service's `/decide` and `/analyze` endpoints.
#[derive(Debug, Serialize)]
pub struct ReasonRequest<'a> {
    pub address: &'a str,
    pub evidence: &'a Evidence,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub result: Option<OwnershipResult>,
}
