//! HTTP API endpoint handlers
//!
//! JSON in, JSON out. The wire surface mirrors the core's introspection
//! operations one-to-one; no business logic lives here.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use engram_core::{CoreError, Mode, StorageError};

use crate::state::AppState;
use crate::ws;

/// Build the axum router with all API routes
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health))
        // Graph
        .route("/api/graph", get(get_graph))
        .route("/api/graph/activate", post(activate))
        .route("/api/graph/strengthen", post(strengthen))
        .route("/api/graph/reindex", post(reindex))
        .route("/api/graph/concepts", get(find_concepts))
        // Scoring
        .route("/api/score", post(score))
        // Facts
        .route("/api/profiles", get(list_profiles))
        .route("/api/facts/{profile}", get(list_facts))
        .route("/api/facts", post(upsert_fact))
        .route("/api/facts/{profile}/{key}", delete(delete_fact))
        // Session intake and consolidation
        .route("/api/observe", post(observe))
        .route("/api/consolidate", post(consolidate))
        .route("/api/context", post(assemble_context))
        // Deferred confirmations
        .route("/api/deferred", get(list_deferred))
        .route("/api/deferred/{id}/resolve", post(resolve_deferred))
        // Events
        .route("/api/events", get(list_events))
        .route("/ws", get(ws::ws_handler))
        // Runtime
        .route("/api/loops", get(loop_status))
        .route("/api/loops/{name}/enable", post(enable_loop))
        .route("/api/triggers", get(trigger_status))
        // Storage mode
        .route("/api/mode/{mode}", post(switch_mode))
        .layer(ServiceBuilder::new().concurrency_limit(32).layer(cors))
        .with_state(state)
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Map core errors onto stable HTTP categories
fn api_error(e: CoreError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::Storage(StorageError::Busy) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn ok<T: serde::Serialize>(value: T) -> ApiResult {
    Ok(Json(
        serde_json::to_value(value)
            .unwrap_or_else(|e| json!({"error": format!("serialization: {}", e)})),
    ))
}

// ============================================================================
// HEALTH
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiResult {
    let snapshot = state.core.health().map_err(api_error)?;
    Ok(Json(json!({
        "uptimeSecs": state.uptime_secs(),
        "health": snapshot,
    })))
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphParams {
    pub max_nodes: Option<usize>,
}

async fn get_graph(State(state): State<AppState>, Query(params): Query<GraphParams>) -> ApiResult {
    let max_nodes = params.max_nodes.unwrap_or(100).clamp(1, 2000);
    ok(state.core.get_graph(max_nodes).map_err(api_error)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActivateBody {
    pub query: String,
}

async fn activate(State(state): State<AppState>, Json(body): Json<ActivateBody>) -> ApiResult {
    ok(state.core.activate(&body.query).map_err(api_error)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrengthenBody {
    pub a: String,
    pub b: String,
    pub delta: f64,
}

async fn strengthen(State(state): State<AppState>, Json(body): Json<StrengthenBody>) -> ApiResult {
    let strength = state
        .core
        .strengthen(&body.a, &body.b, body.delta)
        .map_err(api_error)?;
    Ok(Json(json!({"strength": strength})))
}

async fn reindex(State(state): State<AppState>) -> ApiResult {
    let links = state.core.reindex().map_err(api_error)?;
    Ok(Json(json!({"links": links})))
}

#[derive(Debug, Deserialize)]
pub struct ConceptSearchParams {
    pub q: String,
    pub limit: Option<usize>,
}

async fn find_concepts(
    State(state): State<AppState>,
    Query(params): Query<ConceptSearchParams>,
) -> ApiResult {
    let terms: Vec<String> = params
        .q
        .split_whitespace()
        .map(|s| s.to_lowercase())
        .collect();
    let concepts = state
        .core
        .find_concepts(&terms, params.limit.unwrap_or(50))
        .map_err(api_error)?;
    Ok(Json(json!({"concepts": concepts})))
}

// ============================================================================
// SCORING
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreBody {
    pub query: String,
    /// Restrict scoring to these facts; omitted means all facts
    pub facts: Option<Vec<FactRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRef {
    pub profile: String,
    pub key: String,
}

async fn score(State(state): State<AppState>, Json(body): Json<ScoreBody>) -> ApiResult {
    let refs: Option<Vec<(String, String)>> = body
        .facts
        .map(|fs| fs.into_iter().map(|f| (f.profile, f.key)).collect());
    ok(state
        .core
        .score(&body.query, refs.as_deref())
        .map_err(api_error)?)
}

// ============================================================================
// FACTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileParams {
    pub profile_type: Option<String>,
}

async fn list_profiles(
    State(state): State<AppState>,
    Query(params): Query<ProfileParams>,
) -> ApiResult {
    ok(state
        .core
        .list_profiles(params.profile_type.as_deref())
        .map_err(api_error)?)
}

async fn list_facts(State(state): State<AppState>, Path(profile): Path<String>) -> ApiResult {
    ok(state.core.list_facts(&profile).map_err(api_error)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpsertFactBody {
    pub profile: String,
    pub key: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub v1: String,
    #[serde(default)]
    pub v2: String,
    #[serde(default)]
    pub v3: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    0.5
}

async fn upsert_fact(State(state): State<AppState>, Json(body): Json<UpsertFactBody>) -> ApiResult {
    ok(state
        .core
        .upsert_fact(
            &body.profile,
            &body.key,
            &body.kind,
            &body.v1,
            &body.v2,
            &body.v3,
            body.weight,
        )
        .map_err(api_error)?)
}

async fn delete_fact(
    State(state): State<AppState>,
    Path((profile, key)): Path<(String, String)>,
) -> ApiResult {
    let deleted = state.core.delete_fact(&profile, &key).map_err(api_error)?;
    Ok(Json(json!({"deleted": deleted})))
}

// ============================================================================
// SESSIONS AND CONSOLIDATION
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObserveBody {
    pub session: String,
    pub profile: String,
    pub text: String,
}

async fn observe(State(state): State<AppState>, Json(body): Json<ObserveBody>) -> ApiResult {
    ok(state
        .core
        .observe(&body.session, &body.profile, &body.text)
        .map_err(api_error)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsolidateBody {
    /// One session; omitted means every pending session
    pub session: Option<String>,
}

async fn consolidate(
    State(state): State<AppState>,
    body: Option<Json<ConsolidateBody>>,
) -> ApiResult {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match body.session {
        Some(session) => ok(state.core.consolidate(&session).map_err(api_error)?),
        None => ok(state.core.consolidate_all().map_err(api_error)?),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextBody {
    pub query: String,
}

async fn assemble_context(
    State(state): State<AppState>,
    Json(body): Json<ContextBody>,
) -> ApiResult {
    ok(state.core.assemble_context(&body.query).map_err(api_error)?)
}

// ============================================================================
// DEFERRED CONFIRMATIONS
// ============================================================================

async fn list_deferred(State(state): State<AppState>) -> ApiResult {
    ok(state.core.list_deferred().map_err(api_error)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResolveBody {
    pub accept: bool,
}

async fn resolve_deferred(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult {
    let resolved = state
        .core
        .resolve_deferred(&id, body.accept)
        .map_err(api_error)?;
    Ok(Json(json!({"resolved": resolved})))
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

async fn list_events(State(state): State<AppState>, Query(params): Query<EventParams>) -> ApiResult {
    ok(state
        .core
        .events_since(params.since.unwrap_or(0), params.limit.unwrap_or(100))
        .map_err(api_error)?)
}

// ============================================================================
// RUNTIME
// ============================================================================

async fn loop_status(State(state): State<AppState>) -> ApiResult {
    ok(state.runtime.status())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnableBody {
    pub enabled: bool,
}

async fn enable_loop(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<EnableBody>,
) -> ApiResult {
    match state.runtime.set_loop_enabled(&name, body.enabled) {
        Ok(()) => Ok(Json(json!({"loop": name, "enabled": body.enabled}))),
        Err(e) => Err((StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()})))),
    }
}

async fn trigger_status(State(state): State<AppState>) -> ApiResult {
    ok(state.runtime.trigger_status())
}

// ============================================================================
// STORAGE MODE
// ============================================================================

async fn switch_mode(State(state): State<AppState>, Path(mode): Path<String>) -> ApiResult {
    let mode = match mode.as_str() {
        "primary" => Mode::Primary,
        "demo" => Mode::Demo,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("unknown mode '{}'", other)})),
            ));
        }
    };
    let switched = state.core.switch_mode(mode).map_err(api_error)?;
    Ok(Json(json!({"mode": switched.as_str()})))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{Core, CoreConfig, Runtime};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_api_error_maps_stable_categories() {
        let (status, _) = api_error(CoreError::InvalidInput("bad".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = api_error(CoreError::Storage(StorageError::Busy));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = api_error(CoreError::Storage(StorageError::Unavailable("gone".into())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_router_builds_against_live_core() {
        let dir = tempdir().unwrap();
        let core = Arc::new(
            Core::open(CoreConfig::default(), Some(dir.path().to_path_buf())).unwrap(),
        );
        let runtime = Arc::new(Runtime::start(Arc::clone(&core)));
        let state = AppState::new(Arc::clone(&core), Arc::clone(&runtime));

        let _router = build_router(state);
        runtime.shutdown().await;
    }
}
