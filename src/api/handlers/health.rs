use crate::{
    api::{error::ServerError, state::AppState},
    core::health::{self, HealthInputs, HealthReport, HealthStatus, Liveness, Readiness},
};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": HealthStatus::Healthy,
        "service": health::SERVICE_NAME,
        "version": health::SERVICE_VERSION,
        "timestamp": Utc::now(),
    }))
}

pub async fn live(State(state): State<AppState>) -> Json<Liveness> {
    Json(health::liveness(state.started_at))
}

pub async fn ready(State(state): State<AppState>) -> Result<Json<Readiness>, ServerError> {
    health::readiness(&state.db)
        .await
        .map(Json)
        .map_err(|e| ServerError::new(StatusCode::SERVICE_UNAVAILABLE, format!("Not ready: {e}")))
}

pub async fn detailed(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let stats = state.realtime.stats().await;
    let inputs = HealthInputs {
        environment: state.settings.environment.as_str().to_string(),
        started_at: state.started_at,
        mqtt_connected: state.mqtt_status(),
        websocket: serde_json::to_value(stats).ok(),
    };
    let report = health::detailed(&state.db, inputs).await;
    let status = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}
