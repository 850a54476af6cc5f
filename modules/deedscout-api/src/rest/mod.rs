pub mod research;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use deedscout_common::{
    AddressTask, Confidence, DeedScoutError, Evidence, Job, JobStatus, OwnerType, StageLedger,
    TaskStatus,
};

use crate::app::AppState;

// --- Response shapes ---

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_addresses: usize,
    pub completed_addresses: usize,
    pub results: Vec<AddressResult>,
}

#[derive(Debug, Serialize)]
pub struct AddressResult {
    pub address: String,
    pub status: TaskStatus,
    pub owner_name: Option<String>,
    pub owner_type: Option<OwnerType>,
    pub contact_number: Option<String>,
    pub confidence: Option<Confidence>,
    pub errors: Vec<String>,
    pub completed: bool,
    pub stages: StageLedger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl JobResponse {
    pub fn from_job(job: &Job, include_evidence: bool) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            total_addresses: job.total_addresses,
            completed_addresses: job.completed_addresses,
            results: job
                .tasks
                .iter()
                .map(|task| AddressResult::from_task(task, include_evidence))
                .collect(),
        }
    }
}

impl AddressResult {
    fn from_task(task: &AddressTask, include_evidence: bool) -> Self {
        let result = task.result.as_ref();
        Self {
            address: task.address.clone(),
            status: task.status,
            owner_name: result.map(|r| r.owner_name.clone()),
            owner_type: result.map(|r| r.owner_type),
            contact_number: result.and_then(|r| r.contact_number.clone()),
            confidence: result.map(|r| r.confidence),
            errors: task.errors.clone(),
            completed: task.status.is_terminal(),
            stages: task.stages.clone(),
            evidence: include_evidence.then(|| task.evidence.clone()),
        }
    }
}

// --- Errors ---

pub(crate) fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

/// Malformed ids land here too: they can never name a job.
pub(crate) fn job_not_found(job_id: impl std::fmt::Display) -> Response {
    error_json(StatusCode::NOT_FOUND, format!("Job with ID {job_id} not found"))
}

pub(crate) fn error_response(err: DeedScoutError) -> Response {
    match err {
        DeedScoutError::Validation(message) => error_json(StatusCode::BAD_REQUEST, message),
        DeedScoutError::JobNotFound(job_id) => job_not_found(job_id),
        other => {
            warn!(error = %other, "Request failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// --- Health ---

pub async fn api_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "storageConnected": state.manager.storage_connected().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deedscout_common::{OwnershipResult, StageId, StageOutcome};

    #[test]
    fn unfinished_task_has_no_result_fields() {
        let job = Job::new(vec!["1 MAIN ST".into()]);
        let response = JobResponse::from_job(&job, false);
        let value = serde_json::to_value(&response).unwrap();

        let result = &value["results"][0];
        assert_eq!(result["status"], "pending");
        assert_eq!(result["completed"], false);
        assert!(result["owner_name"].is_null());
        assert!(result["confidence"].is_null());
        assert!(result.get("evidence").is_none());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["total_addresses"], 1);
    }

    #[test]
    fn finished_task_flattens_its_result() {
        let mut job = Job::new(vec!["1 MAIN ST".into()]);
        let task = &mut job.tasks[0];
        task.status = TaskStatus::Done;
        task.stages.insert(StageId::PropertyRegistry, StageOutcome::Completed);
        task.stages.insert(StageId::DocumentProcessing, StageOutcome::Skipped);
        task.result = Some(OwnershipResult {
            owner_name: "ACME HOLDINGS LLC".into(),
            owner_type: OwnerType::Llc,
            contact_number: Some("(555) 123-4567".into()),
            confidence: Confidence::High,
        });

        let value = serde_json::to_value(JobResponse::from_job(&job, true)).unwrap();
        let result = &value["results"][0];
        assert_eq!(result["owner_name"], "ACME HOLDINGS LLC");
        assert_eq!(result["owner_type"], "llc");
        assert_eq!(result["contact_number"], "(555) 123-4567");
        assert_eq!(result["confidence"], "high");
        assert_eq!(result["completed"], true);
        assert_eq!(result["stages"]["property_registry"], "completed");
        assert_eq!(result["stages"]["document_processing"], "skipped");
        assert!(result["evidence"].is_object());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (DeedScoutError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (DeedScoutError::JobNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (DeedScoutError::Storage("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).status(), expected);
        }
    }
}
