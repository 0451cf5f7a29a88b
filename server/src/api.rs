//! HTTP API handlers.
//!
//! JSON in, JSON out; errors map through `Error::status` with a terse
//! message and the stable error kind. The router splits into an open
//! part (`/health`, `/version`) and a project part behind the optional
//! shared-secret middleware.

use axum::{
    extract::{Json, Path as AxumPath, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;
use crate::indexer::CancelToken;
use crate::store::SearchQuery;
use crate::types::{Edge, IndexStats, Node, Project, SymbolKind};
use crate::supervisor::Supervisor;

// ---------------------------------------------------------------------------
// Shared app state
// ---------------------------------------------------------------------------

/// Axum application state.
#[derive(Clone)]
pub struct AppContext {
    pub supervisor: Arc<Supervisor>,
    pub api_key: Option<Arc<str>>,
    pub start_time: std::time::Instant,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(e: Error) -> ApiError {
    (
        e.status(),
        Json(serde_json::json!({ "error": e.to_string(), "kind": e.tag() })),
    )
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub registered_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: Option<IndexStats>,
}

impl ProjectResponse {
    fn from_parts(project: Project, stats: Option<IndexStats>) -> Self {
        Self {
            id: project.id,
            path: project.path,
            name: project.name,
            registered_at: project.registered_at,
            stats,
        }
    }
}

#[derive(Serialize)]
struct SearchResult {
    symbol_name: String,
    symbol_kind: String,
    file_path: String,
    start_line: usize,
    end_line: usize,
    signature: String,
    score: f64,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    total: usize,
    results: Vec<SearchResult>,
}

#[derive(Serialize)]
struct EdgeView {
    target: String,
    kind: &'static str,
    file_path: String,
    line: usize,
}

#[derive(Serialize)]
struct SymbolRelations {
    id: String,
    name: String,
    kind: String,
    file_path: String,
    start_line: usize,
    end_line: usize,
    edges: Vec<EdgeView>,
}

fn relations_view(matches: Vec<(Node, Vec<Edge>)>, incoming: bool) -> Vec<SymbolRelations> {
    matches
        .into_iter()
        .map(|(node, edges)| SymbolRelations {
            id: node.id,
            name: node.name,
            kind: node.kind.label().to_string(),
            file_path: node.file_path,
            start_line: node.start_line,
            end_line: node.end_line,
            edges: edges
                .into_iter()
                .map(|e| EdgeView {
                    // For dependents the interesting endpoint is the source.
                    target: if incoming { e.source } else { e.target },
                    kind: e.kind.label(),
                    file_path: e.file_path,
                    line: e.line,
                })
                .collect(),
        })
        .collect()
}

/// Impact nodes grouped by defining file.
fn group_by_file(nodes: &[Node]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in nodes {
        grouped.entry(node.file_path.clone()).or_default().push(node.id.clone());
    }
    grouped
}

// ---------------------------------------------------------------------------
// Open endpoints
// ---------------------------------------------------------------------------

async fn api_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "projects": ctx.supervisor.project_count(),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

async fn api_version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Project CRUD
// ---------------------------------------------------------------------------

async fn api_list_projects(State(ctx): State<AppContext>) -> Json<Vec<ProjectResponse>> {
    let projects = ctx.supervisor.list_projects();
    let responses = projects
        .into_iter()
        .map(|p| {
            let stats = ctx.supervisor.get_indexer(&p.id).ok().and_then(|i| i.stats().ok());
            ProjectResponse::from_parts(p, stats)
        })
        .collect();
    Json(responses)
}

#[derive(Deserialize)]
struct RegisterRequest {
    path: String,
}

async fn api_register_project(
    State(ctx): State<AppContext>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let supervisor = Arc::clone(&ctx.supervisor);
    let project = tokio::task::spawn_blocking(move || {
        supervisor.register(std::path::Path::new(&body.path))
    })
    .await
    .map_err(|e| api_error(Error::InvalidInput(e.to_string())))?
    .map_err(api_error)?;

    let stats = ctx.supervisor.get_indexer(&project.id).ok().and_then(|i| i.stats().ok());
    Ok((StatusCode::CREATED, Json(ProjectResponse::from_parts(project, stats))))
}

async fn api_get_project(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = ctx.supervisor.get_project(&id).map_err(api_error)?;
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let stats = indexer.stats().map_err(api_error)?;
    Ok(Json(ProjectResponse::from_parts(project, Some(stats))))
}

async fn api_unregister_project(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let project = ctx.supervisor.unregister(&id).map_err(api_error)?;
    Ok(Json(serde_json::json!({ "status": "unregistered", "id": project.id })))
}

// ---------------------------------------------------------------------------
// Indexing and queries
// ---------------------------------------------------------------------------

async fn api_reindex(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;

    let result =
        tokio::task::spawn_blocking(move || indexer.index_all(&CancelToken::new()))
            .await
            .map_err(|e| api_error(Error::InvalidInput(e.to_string())))?;

    match result {
        Ok(documents) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "documents": documents })),
        )),
        // A rebuild already in flight is not an error to the caller.
        Err(Error::Rebuilding) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "indexing" })),
        )),
        Err(e) => Err(api_error(e)),
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    kind: Option<String>,
    path: Option<String>,
    branch: Option<String>,
}

async fn api_search(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(api_error(Error::InvalidInput("query must not be empty".into())));
    }
    let kind = match &body.kind {
        Some(raw) => Some(
            SymbolKind::parse(raw)
                .ok_or_else(|| api_error(Error::InvalidInput(format!("unknown kind: {raw}"))))?,
        ),
        None => None,
    };

    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let hits = indexer
        .search(&SearchQuery {
            query: body.query.clone(),
            limit: body.limit,
            kind,
            path_prefix: body.path,
            branch: body.branch,
        })
        .map_err(api_error)?;

    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|h| SearchResult {
            symbol_name: h.chunk.symbol_name,
            symbol_kind: h
                .chunk
                .symbol_kind
                .map(|k| k.label().to_string())
                .unwrap_or_else(|| "chunk".to_string()),
            file_path: h.chunk.file_path,
            start_line: h.chunk.start_line,
            end_line: h.chunk.end_line,
            signature: h.chunk.signature,
            score: h.score,
        })
        .collect();

    Ok(Json(SearchResponse { query: body.query, total: results.len(), results }))
}

async fn api_dependencies(
    State(ctx): State<AppContext>,
    AxumPath((id, symbol)): AxumPath<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let matches = indexer.dependencies(&symbol).map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "matches": relations_view(matches, false),
    })))
}

async fn api_dependents(
    State(ctx): State<AppContext>,
    AxumPath((id, symbol)): AxumPath<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let matches = indexer.dependents(&symbol).map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "matches": relations_view(matches, true),
    })))
}

async fn api_impact(
    State(ctx): State<AppContext>,
    AxumPath((id, file)): AxumPath<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let impact = indexer.impact(&file).map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "file": file,
        "direct": group_by_file(&impact.direct),
        "indirect": group_by_file(&impact.indirect),
    })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn api_history(
    State(ctx): State<AppContext>,
    AxumPath(id): AxumPath<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let indexer = ctx.supervisor.get_indexer(&id).map_err(api_error)?;
    let limit = q.limit.unwrap_or(10).clamp(1, 100);
    let history = indexer.history(limit).map_err(api_error)?;
    Ok(Json(serde_json::json!(history)))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the full HTTP router: open endpoints plus the project API
/// behind the shared-secret middleware.
pub fn router(ctx: AppContext) -> Router {
    let protected = Router::new()
        .route("/projects", get(api_list_projects).post(api_register_project))
        .route("/projects/{id}", get(api_get_project).delete(api_unregister_project))
        .route("/projects/{id}/index", post(api_reindex))
        .route("/projects/{id}/search", post(api_search))
        .route("/projects/{id}/deps/{symbol}", get(api_dependencies))
        .route("/projects/{id}/dependents/{symbol}", get(api_dependents))
        .route("/projects/{id}/impact/{*file}", get(api_impact))
        .route("/projects/{id}/history", get(api_history))
        .layer(axum::middleware::from_fn_with_state(ctx.clone(), crate::auth::require_api_key));

    Router::new()
        .route("/health", get(api_health))
        .route("/version", get(api_version))
        .merge(protected)
        .with_state(ctx)
}
