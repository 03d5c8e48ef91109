//! HTTP facade over the core services.
//!
//! Thin axum layer: routes deserialize request parameters, call the
//! services, and map [`MnemeError`] onto structured JSON error responses
//! via its status mapping (400 validation, 404 not found, 409 conflict,
//! 500 store/io).

use crate::{
    context::{ContextBuilder, ContextRequest, GraphContext, MemoryUrl},
    error::MnemeError,
    knowledge::{CreateEntityRequest, EntityWithChildren, KnowledgeService},
    search::{SearchIndex, SearchItemType, SearchQuery, SearchResult},
    sync::{SyncReport, SyncService},
    timeframe,
};
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
    pub knowledge: Arc<KnowledgeService>,
    pub context: Arc<ContextBuilder>,
    pub search: Arc<SearchIndex>,
}

impl AppState {
    pub fn new(sync: Arc<SyncService>) -> Self {
        let knowledge = Arc::new(KnowledgeService::new(sync.clone()));
        let context = Arc::new(ContextBuilder::new(sync.store().pool().clone()));
        let search = Arc::new(sync.search().clone());
        AppState {
            sync,
            knowledge,
            context,
            search,
        }
    }
}

impl IntoResponse for MnemeError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Build the application router. `/memory/recent` is registered before the
/// wildcard URI route so it cannot be shadowed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/knowledge/entities", post(create_entity))
        .route(
            "/knowledge/entities/*permalink",
            get(get_entity).delete(delete_entity),
        )
        .route("/search", get(search))
        .route("/memory/recent", get(recent_context))
        .route("/memory/*uri", get(memory_context))
        .route("/sync", post(trigger_sync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_entity(
    State(state): State<AppState>,
    AxumPath(permalink): AxumPath<String>,
) -> Result<Json<EntityWithChildren>, MnemeError> {
    Ok(Json(state.knowledge.get_entity(&permalink).await?))
}

async fn create_entity(
    State(state): State<AppState>,
    Json(request): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<EntityWithChildren>), MnemeError> {
    let created = state.knowledge.create_entity(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_entity(
    State(state): State<AppState>,
    AxumPath(permalink): AxumPath<String>,
) -> Result<StatusCode, MnemeError> {
    state.knowledge.delete_entity(&permalink).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    permalink: Option<String>,
    pattern: Option<String>,
    /// Comma-separated list of item types.
    #[serde(rename = "type")]
    types: Option<String>,
    after: Option<String>,
    entity_id: Option<i64>,
    limit: Option<usize>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, MnemeError> {
    let query = SearchQuery {
        text: params.q,
        permalink: params.permalink,
        permalink_pattern: params.pattern,
        types: params.types.as_deref().map(parse_types).transpose()?,
        after: params
            .after
            .as_deref()
            .map(timeframe::parse_timeframe)
            .transpose()?,
        entity_id: params.entity_id,
        limit: params.limit,
    };
    Ok(Json(state.search.search(&query).await?))
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    depth: Option<usize>,
    timeframe: Option<String>,
    max_results: Option<usize>,
    #[serde(rename = "type")]
    types: Option<String>,
}

impl ContextParams {
    fn into_request(self) -> Result<ContextRequest, MnemeError> {
        let defaults = ContextRequest::default();
        Ok(ContextRequest {
            depth: self.depth.unwrap_or(defaults.depth),
            timeframe: self.timeframe,
            max_results: self.max_results.unwrap_or(defaults.max_results),
            types: self.types.as_deref().map(parse_types).transpose()?,
        })
    }
}

async fn memory_context(
    State(state): State<AppState>,
    AxumPath(uri): AxumPath<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<GraphContext>, MnemeError> {
    let url = MemoryUrl::parse(&uri)?;
    let request = params.into_request()?;
    Ok(Json(state.context.build_context(&url, &request).await?))
}

async fn recent_context(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<GraphContext>, MnemeError> {
    let request = params.into_request()?;
    Ok(Json(
        state
            .context
            .build_context(&MemoryUrl::Recent, &request)
            .await?,
    ))
}

async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncReport>, MnemeError> {
    Ok(Json(state.sync.sync().await?))
}

fn parse_types(raw: &str) -> Result<Vec<SearchItemType>, MnemeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(SearchItemType::parse)
        .collect()
}
