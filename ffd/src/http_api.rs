//! HTTP surface for flag administration and evaluation.
//!
//! Control plane (consumed by the admin UI):
//! - `POST /flags`, `GET /flags`, `GET /flags/{id}`, `PATCH /flags/{id}`
//! - `POST /flags/{id}/toggle|rollout|kill|archive`
//! - `POST /flags/{id}/overrides`, `DELETE /flags/{id}/overrides/{tenant}`
//! - `GET /flags/{id}/history`
//!
//! Evaluation surface (consumed by the product runtime):
//! - `GET /feature-flags/{tenant_id}?environment=..&tier=..`
//!
//! Observability:
//! - `GET /health`, `GET /metrics`

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::json;

use ffd_common::{
    AdminOps, CreateFlagInput, FeatureFlag, FlagError, FlagId, FlagPatch, HistoryEntry,
    ResolutionEngine, TenantContext, TenantId, TenantOverride,
};

use crate::metrics::{self, record_admin_op};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub admin: Arc<AdminOps>,
    pub engine: Arc<ResolutionEngine>,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon PID.
    pub pid: u32,
}

/// Create the HTTP router for all daemon endpoints.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/flags", post(create_flag).get(list_flags))
        .route("/flags/{id}", get(get_flag).patch(patch_flag))
        .route("/flags/{id}/toggle", post(toggle_flag))
        .route("/flags/{id}/rollout", post(update_rollout))
        .route("/flags/{id}/kill", post(kill_flag))
        .route("/flags/{id}/archive", post(archive_flag))
        .route("/flags/{id}/overrides", get(list_overrides).post(add_override))
        .route("/flags/{id}/overrides/{tenant_id}", delete(remove_override))
        .route("/flags/{id}/history", get(history))
        .route("/feature-flags/{tenant_id}", get(evaluate))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

/// Wraps [`FlagError`] with its HTTP status mapping.
pub struct ApiError(FlagError);

impl From<FlagError> for ApiError {
    fn from(err: FlagError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlagError::Validation { .. } | FlagError::ImmutableField { .. } => {
                StatusCode::BAD_REQUEST
            }
            FlagError::Conflict { .. } => StatusCode::CONFLICT,
            FlagError::NotFound { .. } => StatusCode::NOT_FOUND,
            FlagError::ConfirmationRequired { .. } => StatusCode::PRECONDITION_REQUIRED,
            FlagError::Configuration { .. } | FlagError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

fn default_actor() -> String {
    "admin".to_string()
}

#[derive(Deserialize)]
struct ToggleBody {
    enabled: bool,
    #[serde(default)]
    confirmed: bool,
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct RolloutBody {
    percentage: u16,
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct KillBody {
    reason: String,
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct ActorBody {
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct OverrideBody {
    tenant_id: String,
    enabled: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct PatchBody {
    #[serde(flatten)]
    patch: FlagPatch,
    #[serde(default = "default_actor")]
    actor: String,
}

#[derive(Deserialize)]
struct EvalQuery {
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    tier: Option<String>,
}

async fn create_flag(
    State(state): State<Arc<HttpState>>,
    Json(input): Json<CreateFlagInput>,
) -> Result<(StatusCode, Json<FeatureFlag>), ApiError> {
    let result = state.admin.create_flag(input);
    record_admin_op("create", result.is_ok());
    Ok((StatusCode::CREATED, Json(result?)))
}

async fn list_flags(State(state): State<Arc<HttpState>>) -> Json<Vec<FeatureFlag>> {
    let flags = state
        .admin
        .list_flags()
        .into_iter()
        .map(|f| (*f).clone())
        .collect();
    Json(flags)
}

async fn get_flag(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let flag = state.admin.get_flag(id)?;
    Ok(Json((*flag).clone()))
}

async fn patch_flag(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<PatchBody>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state.admin.update_flag(id, body.patch, &body.actor);
    record_admin_op("update", result.is_ok());
    Ok(Json(result?))
}

async fn toggle_flag(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<ToggleBody>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state
        .admin
        .toggle_flag(id, body.enabled, body.confirmed, &body.actor);
    record_admin_op("toggle", result.is_ok());
    Ok(Json(result?))
}

async fn update_rollout(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<RolloutBody>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state.admin.update_rollout(id, body.percentage, &body.actor);
    record_admin_op("rollout", result.is_ok());
    Ok(Json(result?))
}

async fn kill_flag(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<KillBody>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state.admin.kill_flag(id, body.reason, &body.actor);
    record_admin_op("kill", result.is_ok());
    Ok(Json(result?))
}

async fn archive_flag(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    body: Option<Json<ActorBody>>,
) -> Result<Json<FeatureFlag>, ApiError> {
    let id = FlagId::parse(&id)?;
    let actor = body.map(|Json(b)| b.actor).unwrap_or_else(default_actor);
    let result = state.admin.archive_flag(id, &actor);
    record_admin_op("archive", result.is_ok());
    Ok(Json(result?))
}

async fn list_overrides(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TenantOverride>>, ApiError> {
    let id = FlagId::parse(&id)?;
    Ok(Json(state.admin.list_overrides(id)?))
}

async fn add_override(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<TenantOverride>, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state.admin.add_override(
        id,
        TenantId::new(body.tenant_id),
        body.enabled,
        body.reason,
        &body.actor,
    );
    record_admin_op("override_add", result.is_ok());
    Ok(Json(result?))
}

async fn remove_override(
    State(state): State<Arc<HttpState>>,
    Path((id, tenant_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let id = FlagId::parse(&id)?;
    let result = state
        .admin
        .remove_override(id, &TenantId::new(tenant_id), &default_actor());
    record_admin_op("override_remove", result.is_ok());
    result?;
    Ok(StatusCode::OK)
}

async fn history(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let id = FlagId::parse(&id)?;
    Ok(Json(state.admin.history(id)?))
}

/// Bulk evaluation: `flag_key -> bool` for every non-archived flag.
async fn evaluate(
    State(state): State<Arc<HttpState>>,
    Path(tenant_id): Path<String>,
    Query(query): Query<EvalQuery>,
) -> Json<serde_json::Value> {
    let ctx = TenantContext {
        tenant_id: TenantId::new(tenant_id),
        environment: query.environment.unwrap_or_else(|| "production".to_string()),
        tier: query.tier,
    };
    let decisions = state.engine.evaluate_all(&ctx);
    Json(json!(decisions))
}

/// Handler for `/health` - basic daemon health check.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": uptime_secs,
        "flags": state.admin.list_flags().len(),
    }))
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ffd_common::{MemoryFlagStore, MemoryHistoryLog, MemoryOverrideStore};
    use tower::ServiceExt;

    fn make_router() -> Router {
        let flags = Arc::new(MemoryFlagStore::new());
        let overrides = Arc::new(MemoryOverrideStore::new());
        let history = Arc::new(MemoryHistoryLog::new());
        let admin = Arc::new(AdminOps::new(flags.clone(), overrides.clone(), history));
        let engine = Arc::new(ResolutionEngine::new(flags, overrides));
        create_router(HttpState {
            admin,
            engine,
            version: "0.0.0-test",
            started_at: Instant::now(),
            pid: 4242,
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn flag_body(key: &str) -> serde_json::Value {
        json!({
            "key": key,
            "display_name": key,
            "category": "beta",
            "enabled": false,
            "strategy": "all_or_nothing",
            "environments": ["production"],
            "created_by": "test-admin",
        })
    }

    /// Create a flag through the API and return its id.
    async fn create(router: &Router, body: serde_json::Value) -> String {
        let response = router
            .clone()
            .oneshot(post_json("/flags", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_returns_201_with_flag() {
        let router = make_router();
        let response = router
            .oneshot(post_json("/flags", flag_body("checkout_v2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let flag = body_json(response).await;
        assert_eq!(flag["key"], "checkout_v2");
        assert_eq!(flag["lifecycle"], "active");
        assert_eq!(flag["enabled"], false);
    }

    #[tokio::test]
    async fn create_rejects_bad_key_with_400() {
        let router = make_router();
        let response = router
            .oneshot(post_json("/flags", flag_body("2bad-key!")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "FFD-E001");
    }

    #[tokio::test]
    async fn create_duplicate_key_is_409() {
        let router = make_router();
        create(&router, flag_body("dup_key")).await;
        let response = router
            .oneshot(post_json("/flags", flag_body("dup_key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "FFD-E002");
    }

    #[tokio::test]
    async fn toggle_without_confirmation_is_428() {
        let router = make_router();
        let mut body = flag_body("guarded_gate");
        body["require_confirmation"] = json!(true);
        let id = create(&router, body).await;

        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/flags/{id}/toggle"),
                json!({"enabled": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);

        let response = router
            .oneshot(post_json(
                &format!("/flags/{id}/toggle"),
                json!({"enabled": true, "confirmed": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["enabled"], true);
    }

    #[tokio::test]
    async fn rollout_out_of_range_is_400() {
        let router = make_router();
        let id = create(&router, flag_body("ramp_gate")).await;
        let response = router
            .oneshot(post_json(
                &format!("/flags/{id}/rollout"),
                json!({"percentage": 101}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn kill_of_non_kill_switch_is_409() {
        let router = make_router();
        let id = create(&router, flag_body("plain_flag")).await;
        let response = router
            .oneshot(post_json(
                &format!("/flags/{id}/kill"),
                json!({"reason": "incident"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn kill_then_flag_resolves_off() {
        let router = make_router();
        let mut body = flag_body("panic_button");
        body["is_kill_switch"] = json!(true);
        body["enabled"] = json!(true);
        let id = create(&router, body).await;

        // Enabled and all-or-nothing: on for any tenant.
        let response = router
            .clone()
            .oneshot(get_req("/feature-flags/acme?environment=production"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["panic_button"], true);

        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/flags/{id}/kill"),
                json!({"reason": "sev1", "actor": "oncall"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(get_req("/feature-flags/acme?environment=production"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["panic_button"], false);
    }

    #[tokio::test]
    async fn patch_cannot_change_flag_key() {
        let router = make_router();
        let id = create(&router, flag_body("fixed_key")).await;
        let response = router
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/flags/{id}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"flag_key": "other_key"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "FFD-E005");
    }

    #[tokio::test]
    async fn override_roundtrip_and_missing_delete_404() {
        let router = make_router();
        let id = create(&router, flag_body("override_gate")).await;

        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/flags/{id}/overrides"),
                json!({"tenant_id": "acme", "enabled": true, "reason": "pilot"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Master switch is off but the override wins.
        let response = router
            .clone()
            .oneshot(get_req("/feature-flags/acme"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["override_gate"], true);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/flags/{id}/overrides/acme"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/flags/{id}/overrides/acme"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_lists_operations_newest_first() {
        let router = make_router();
        let id = create(&router, flag_body("audited_gate")).await;
        router
            .clone()
            .oneshot(post_json(
                &format!("/flags/{id}/toggle"),
                json!({"enabled": true}),
            ))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(post_json(
                &format!("/flags/{id}/rollout"),
                json!({"percentage": 10}),
            ))
            .await
            .unwrap();

        let response = router
            .oneshot(get_req(&format!("/flags/{id}/history")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let entries = body_json(response).await;
        let kinds: Vec<&str> = entries
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["change_type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["rollout_updated", "enabled", "created"]);
    }

    #[tokio::test]
    async fn evaluation_respects_environment() {
        let router = make_router();
        let mut body = flag_body("env_scoped");
        body["enabled"] = json!(true);
        body["environments"] = json!(["staging"]);
        create(&router, body).await;

        let response = router
            .clone()
            .oneshot(get_req("/feature-flags/acme?environment=staging"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["env_scoped"], true);

        let response = router
            .oneshot(get_req("/feature-flags/acme?environment=production"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["env_scoped"], false);
    }

    #[tokio::test]
    async fn archived_flag_leaves_evaluation_map() {
        let router = make_router();
        let mut body = flag_body("short_lived");
        body["enabled"] = json!(true);
        let id = create(&router, body).await;

        let response = router
            .clone()
            .oneshot(post_json(&format!("/flags/{id}/archive"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["lifecycle"], "archived");

        let response = router
            .oneshot(get_req("/feature-flags/acme"))
            .await
            .unwrap();
        let map = body_json(response).await;
        assert!(map.get("short_lived").is_none());
    }

    #[tokio::test]
    async fn unknown_flag_id_is_404() {
        let router = make_router();
        let response = router
            .clone()
            .oneshot(get_req(&format!("/flags/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Garbage ids map to 404 as well, not 500.
        let response = router
            .oneshot(get_req("/flags/not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_flag_count() {
        let router = make_router();
        create(&router, flag_body("first_flag")).await;
        let response = router.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "0.0.0-test");
        assert_eq!(body["pid"], 4242);
        assert_eq!(body["flags"], 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_exports_text() {
        let _ = metrics::register_metrics();
        let router = make_router();
        let response = router.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("# HELP") || text.is_empty());
    }
}
