//! Wiring from `Config` to a running job manager and router.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use deedscout_common::{Config, StageId};
use deedscout_research::{
    property_research_graph, AddressRunner, AdapterRegistry, DecisionStage, JobManager, JobStore,
    PgJobStore, Reasoner, ResearchConfig, ResultAggregator, RetryPolicy, RuleBasedReasoner,
    StageKind,
};
use stage_client::{ReasonerClient, StageClient};

use crate::adapters::{HttpReasoner, HttpStageAdapter};
use crate::rest;

pub struct AppState {
    pub manager: JobManager,
}

/// Build the address runner: one HTTP adapter per configured lookup stage, plus the
/// ownership check backed by the remote reasoner or the rule-based fallback.
pub fn build_runner(config: &Config) -> Result<AddressRunner> {
    let graph = property_research_graph()?;
    let token = config.collaborator_token.as_deref();

    let reasoner: Arc<dyn Reasoner> = match &config.reasoner_url {
        Some(url) => {
            info!(url = url.as_str(), "Using remote reasoner");
            Arc::new(HttpReasoner::new(ReasonerClient::with_timeout(
                url,
                token,
                config.stage_timeout,
            )?))
        }
        None => {
            info!("REASONER_URL not set, routing with the rule-based reasoner");
            Arc::new(RuleBasedReasoner)
        }
    };

    let mut registry = AdapterRegistry::new().with(
        StageId::OwnershipCheck,
        Arc::new(DecisionStage::new(reasoner.clone())),
    );
    for spec in graph.stages().iter().filter(|s| s.kind == StageKind::Lookup) {
        // A stage left unconfigured is reported by the registry check below.
        let Some(url) = config.stage_urls.get(&spec.id) else {
            continue;
        };
        let client = StageClient::with_timeout(url, token, config.stage_timeout)?;
        registry.register(spec.id, Arc::new(HttpStageAdapter::new(spec.id, client)));
    }

    let runner = AddressRunner::new(
        Arc::new(graph),
        registry,
        RetryPolicy::from_config(config),
        ResultAggregator::new(config.owner_precedence.clone()),
        Some(reasoner),
    )?;
    Ok(runner)
}

/// Connect the durable job mirror. A database that cannot be reached leaves the service
/// running on in-memory state.
pub async fn connect_store(config: &Config) -> Option<Arc<dyn JobStore>> {
    let Some(url) = &config.database_url else {
        warn!("DATABASE_URL not set, jobs are kept in memory only");
        return None;
    };
    let store = match PgJobStore::connect(url).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Failed to connect to Postgres, jobs are kept in memory only");
            return None;
        }
    };
    if let Err(e) = store.migrate().await {
        warn!(error = %e, "Failed to migrate job table, jobs are kept in memory only");
        return None;
    }
    info!("Connected to Postgres job store");
    Some(Arc::new(store))
}

pub async fn build_state(config: &Config) -> Result<Arc<AppState>> {
    let runner = build_runner(config)?;
    let store = connect_store(config).await;
    let manager = JobManager::new(Arc::new(runner), store, ResearchConfig::from(config));
    Ok(Arc::new(AppState { manager }))
}

pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/research", post(rest::research::api_submit_research))
        .route("/api/research/{job_id}", get(rest::research::api_research_status))
        .route("/api/research/{job_id}/cancel", post(rest::research::api_cancel_research))
        .route("/api/health", get(rest::api_health))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = o.as_str(), "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
