use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api_errors::ApiError;
use crate::app_state::AppState;
use crate::orchestrator::Prediction;

const REQUEST_ID_HEADER: &str = "x-request-id";
const ROUTER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Serialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// Build the gateway router: prediction, health and policy status endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        // current endpoints
        .route("/predict", post(predict))
        .route("/policy", get(policy_status))
        // versioned aliases
        .route("/v1/predict", post(predict))
        .route("/v1/policy", get(policy_status))
        // health endpoints
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(readyz))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(ROUTER_TIMEOUT))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn predict(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "failed to decode request");
        ApiError::bad_request("invalid request body")
    })?;

    let prediction = st
        .orchestrator
        .predict_for(&req.game_id, &req.user_id)
        .await?;
    Ok(Json(prediction))
}

async fn health() -> &'static str {
    "OK"
}

/// Ready once the policy is loaded and kept fresh by the refresh loop.
async fn readyz(State(st): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let status = st.policy().status();
    let ready = status.refresh_loop_started;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(serde_json::json!({
            "ready": ready,
            "env": st.env,
            "policy_version": status.version,
            "policy_refresh_failures": status.consecutive_failures,
        })),
    )
}

async fn policy_status(State(st): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let policy = st.policy().current();
    Json(serde_json::json!({
        "weights": &*policy,
        "total_weight": policy.total_weight(),
        "status": st.policy().status(),
        "uptime_secs": (chrono::Utc::now() - st.started_at).num_seconds(),
    }))
}
