//! sloguard-api — REST API for SloGuard.
//!
//! Axum route handlers over the metric store, alarm evaluator, scaling
//! registry and deployment gate.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/metrics` | Ingest metric samples |
//! | GET | `/api/v1/alarms` | List alarm states |
//! | GET | `/api/v1/alarms/{name}` | Get one alarm with its definition |
//! | GET | `/api/v1/targets` | List scalable targets |
//! | GET | `/api/v1/targets/{id}` | Get one target's capacity |
//! | POST | `/api/v1/targets/{id}/forecast` | Submit a predictive forecast point |
//! | POST | `/api/v1/deployments/{env}` | Start a deployment (202) |
//! | GET | `/api/v1/deployments/{env}` | Deployment status and history |
//! | POST | `/api/v1/deployments/{env}/confirm` | Confirm a high-risk deployment |
//! | POST | `/api/v1/deployments/{env}/cancel` | Cancel the in-flight deployment |
//! | GET | `/api/v1/slo-report/{env}` | SLO compliance report |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! Target ids contain a slash (`service/web`); clients percent-encode it.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use sloguard_alarm::AlarmEvaluator;
use sloguard_autoscale::ScalingRegistry;
use sloguard_gate::DeploymentGate;
use sloguard_metrics::MetricStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<MetricStore>,
    pub alarms: Arc<AlarmEvaluator>,
    pub scaling: Arc<ScalingRegistry>,
    pub gate: Arc<DeploymentGate>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/metrics", post(handlers::ingest_metrics))
        .route("/alarms", get(handlers::list_alarms))
        .route("/alarms/{name}", get(handlers::get_alarm))
        .route("/targets", get(handlers::list_targets))
        .route("/targets/{id}", get(handlers::get_target))
        .route("/targets/{id}/forecast", post(handlers::submit_forecast))
        .route(
            "/deployments/{env}",
            get(handlers::get_deployment).post(handlers::start_deployment),
        )
        .route("/deployments/{env}/confirm", post(handlers::confirm_deployment))
        .route("/deployments/{env}/cancel", post(handlers::cancel_deployment))
        .route("/slo-report/{env}", get(handlers::slo_report))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
