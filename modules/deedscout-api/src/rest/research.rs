use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{error_json, error_response, job_not_found, JobResponse};
use crate::app::AppState;

#[derive(Deserialize)]
pub struct ResearchRequest {
    addresses: Vec<String>,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    evidence: bool,
}

pub async fn api_submit_research(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResearchRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_json(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let job_id = match state.manager.submit(body.addresses).await {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };
    match state.manager.status(job_id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobResponse::from_job(&job, false))).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_research_status(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let Ok(job_id) = Uuid::parse_str(&raw_id) else {
        return job_not_found(&raw_id);
    };
    match state.manager.status(job_id).await {
        Ok(job) => Json(JobResponse::from_job(&job, query.evidence)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_cancel_research(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Response {
    let Ok(job_id) = Uuid::parse_str(&raw_id) else {
        return job_not_found(&raw_id);
    };
    match state.manager.cancel(job_id).await {
        Ok(job) => Json(JobResponse::from_job(&job, false)).into_response(),
        Err(e) => error_response(e),
    }
}
