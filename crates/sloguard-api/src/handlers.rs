//! REST API handlers.
//!
//! Every response uses the `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sloguard_alarm::AlarmError;
use sloguard_autoscale::ScalingError;
use sloguard_core::{AlarmSpec, Timestamp};
use sloguard_gate::{DeploymentStatus, GateError, ReleasePlan, Resource};
use sloguard_state::{AlarmState, DeploymentRecord, MetricSample};

use crate::ApiState;

/// Records returned by the deployment status endpoint.
const HISTORY_LIMIT: usize = 20;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn gate_error(e: GateError) -> axum::response::Response {
    let status = match &e {
        GateError::Busy(_) => StatusCode::CONFLICT,
        GateError::UnknownEnvironment(_) | GateError::NoDeployment(_) => StatusCode::NOT_FOUND,
        GateError::Alarm(AlarmError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Metrics ────────────────────────────────────────────────────

/// POST /api/v1/metrics
pub async fn ingest_metrics(
    State(state): State<ApiState>,
    Json(samples): Json<Vec<MetricSample>>,
) -> impl IntoResponse {
    if let Some(bad) = samples.iter().find(|s| !s.value.is_finite()) {
        return error_response(
            &format!("non-finite value for {}", bad.metric_name),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    let accepted = samples.len();
    match state.metrics.record_batch(samples).await {
        Ok(()) => {
            debug!(accepted, "metric samples ingested");
            ApiResponse::ok(serde_json::json!({ "accepted": accepted })).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Alarms ─────────────────────────────────────────────────────

/// Alarm definition together with its live state.
#[derive(Serialize)]
pub struct AlarmDetail {
    pub spec: AlarmSpec,
    pub state: AlarmState,
}

/// GET /api/v1/alarms
pub async fn list_alarms(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.alarms.states().await)
}

/// GET /api/v1/alarms/{name}
pub async fn get_alarm(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let detail = async {
        Ok::<_, AlarmError>(AlarmDetail {
            spec: state.alarms.spec(&name).await?,
            state: state.alarms.state(&name).await?,
        })
    };
    match detail.await {
        Ok(detail) => ApiResponse::ok(detail).into_response(),
        Err(AlarmError::NotFound(_)) => {
            error_response("alarm not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Scalable targets ───────────────────────────────────────────

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scaling.targets().await)
}

/// GET /api/v1/targets/{id}
pub async fn get_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.scaling.get(&id) {
        Ok(controller) => ApiResponse::ok(controller.snapshot().await).into_response(),
        Err(_) => error_response("scalable target not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// Forecast request body.
#[derive(Debug, Deserialize)]
pub struct ForecastRequest {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// POST /api/v1/targets/{id}/forecast
pub async fn submit_forecast(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ForecastRequest>,
) -> impl IntoResponse {
    if !req.value.is_finite() || req.value < 0.0 {
        return error_response("forecast value must be a non-negative number", StatusCode::BAD_REQUEST)
            .into_response();
    }
    match state.scaling.submit_forecast(&id, req.timestamp, req.value).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "resource_id": id,
            "timestamp": req.timestamp,
            "value": req.value,
        }))
        .into_response(),
        Err(ScalingError::NotFound(_)) => {
            error_response("scalable target not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Deployment request body: the environment's resources before and after.
#[derive(Debug, Deserialize)]
pub struct DeploymentRequest {
    #[serde(default)]
    pub current: Vec<Resource>,
    pub proposed: Vec<Resource>,
}

#[derive(Serialize)]
pub struct DeploymentAccepted {
    pub id: String,
    pub plan: ReleasePlan,
}

#[derive(Serialize)]
pub struct DeploymentOverview {
    pub status: Option<DeploymentStatus>,
    pub history: Vec<DeploymentRecord>,
}

/// POST /api/v1/deployments/{env}
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
    Json(req): Json<DeploymentRequest>,
) -> impl IntoResponse {
    let plan = match state.gate.plan(&env, &req.current, &req.proposed) {
        Ok(plan) => plan,
        Err(e) => return gate_error(e),
    };
    match state.gate.start(plan.clone()) {
        Ok(id) => (StatusCode::ACCEPTED, ApiResponse::ok(DeploymentAccepted { id, plan }))
            .into_response(),
        Err(e) => {
            warn!(environment = %env, error = %e, "deployment rejected");
            gate_error(e)
        }
    }
}

/// GET /api/v1/deployments/{env}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.gate.environment(&env) {
        return gate_error(e);
    }
    match state.gate.history(&env, HISTORY_LIMIT) {
        Ok(history) => ApiResponse::ok(DeploymentOverview {
            status: state.gate.status(&env),
            history,
        })
        .into_response(),
        Err(e) => gate_error(e),
    }
}

/// POST /api/v1/deployments/{env}/confirm
pub async fn confirm_deployment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
) -> impl IntoResponse {
    match state.gate.confirm(&env) {
        Ok(()) => ApiResponse::ok("confirmed").into_response(),
        Err(e) => gate_error(e),
    }
}

/// POST /api/v1/deployments/{env}/cancel
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
) -> impl IntoResponse {
    match state.gate.cancel(&env) {
        Ok(()) => ApiResponse::ok("cancelling").into_response(),
        Err(e) => gate_error(e),
    }
}

/// GET /api/v1/slo-report/{env}
pub async fn slo_report(
    State(state): State<ApiState>,
    Path(env): Path<String>,
) -> impl IntoResponse {
    match state.gate.slo_report(&env).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => gate_error(e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let alarms = state.alarms.states().await;
    let capacities = state.scaling.capacity_gauges().await;
    let series = state.metrics.latest_points().await;

    let body = sloguard_metrics::render_prometheus(&alarms, &capacities, &series);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
