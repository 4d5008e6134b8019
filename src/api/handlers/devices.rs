use crate::{
    api::{auth::CurrentUser, error::ServerError, state::AppState},
    core::{
        alert::{evaluate_thresholds, raise_alert},
        device::{self, DeviceStats, DeviceStatus, DeviceType, DeviceUpdate, NewDevice, StatusReport},
        telemetry,
    },
    entities::{device as device_entity, device_telemetry},
    mqtt,
    realtime::envelope,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct DeviceQuery {
    pub device_type: Option<DeviceType>,
    pub status: Option<DeviceStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryQuery {
    pub metric: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TelemetryRequest {
    pub metric: String,
    pub value: f64,
    pub unit: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub telemetry: device_telemetry::Model,
    /// Id of the alert raised or bumped by this sample
    pub alert_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Device row with the maintenance flag.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: device_entity::Model,
    pub needs_maintenance: bool,
}

impl From<device_entity::Model> for DeviceView {
    fn from(device: device_entity::Model) -> Self {
        let needs_maintenance = device::needs_maintenance(&device);
        Self {
            device,
            needs_maintenance,
        }
    }
}

pub async fn list_devices(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Vec<DeviceView>>, ServerError> {
    let devices = device::list_devices(&state.db, query.device_type, query.status).await?;
    Ok(Json(devices.into_iter().map(DeviceView::from).collect()))
}

pub async fn register_device(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<NewDevice>,
) -> Result<(StatusCode, Json<DeviceView>), ServerError> {
    let created = device::register_device(&state.db, Some(user.id), payload).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn device_stats(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<DeviceStats>, ServerError> {
    Ok(Json(device::device_stats(&state.db).await?))
}

pub async fn device_detail(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(device_id): Path<i64>,
) -> Result<Json<DeviceView>, ServerError> {
    Ok(Json(device::get_device(&state.db, device_id).await?.into()))
}

pub async fn update_device(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(device_id): Path<i64>,
    Json(payload): Json<DeviceUpdate>,
) -> Result<Json<DeviceView>, ServerError> {
    let updated = device::update_device(&state.db, device_id, payload).await?;
    Ok(Json(updated.into()))
}

pub async fn delete_device(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(device_id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    device::delete_device(&state.db, device_id).await?;
    info!(device_id, user_id = user.id, "device deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(device_id): Path<i64>,
    Json(payload): Json<StatusReport>,
) -> Result<Json<DeviceView>, ServerError> {
    let updated = device::update_status(&state.db, device_id, payload).await?;
    state
        .realtime
        .broadcast(
            &envelope(
                "device_status_update",
                json!({
                    "device_id": updated.id,
                    "serial_number": updated.serial_number,
                    "status": updated.status,
                    "timestamp": Utc::now(),
                }),
            ),
            None,
        )
        .await;
    Ok(Json(updated.into()))
}

pub async fn list_telemetry(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(device_id): Path<i64>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<Vec<device_telemetry::Model>>, ServerError> {
    device::get_device(&state.db, device_id).await?;
    let samples =
        telemetry::latest_telemetry(&state.db, device_id, query.metric.as_deref(), query.limit)
            .await?;
    Ok(Json(samples))
}

pub async fn record_telemetry(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(device_id): Path<i64>,
    Json(payload): Json<TelemetryRequest>,
) -> Result<(StatusCode, Json<TelemetryResponse>), ServerError> {
    let target = device::get_device(&state.db, device_id).await?;
    let sample = telemetry::record_telemetry(
        &state.db,
        target.id,
        &payload.metric,
        payload.value,
        payload.unit.as_deref(),
        payload.metadata,
    )
    .await?;

    let mut alert_id = None;
    if let Some(breach) = evaluate_thresholds(&state.settings.alerts, &sample.metric, sample.value) {
        let description = format!("{} reported {} = {}", target.name, sample.metric, sample.value);
        let (alert, created) =
            raise_alert(&state.db, breach.into_alert(Some(target.id), Some(description))).await?;
        if created {
            state
                .realtime
                .broadcast(&envelope("alert_created", json!(alert)), None)
                .await;
        }
        alert_id = Some(alert.id);
    }

    state
        .realtime
        .send_to_room(
            &format!("device_{}", target.id),
            &envelope("sensor_data", json!(sample)),
            None,
        )
        .await;
    Ok((
        StatusCode::CREATED,
        Json(TelemetryResponse {
            telemetry: sample,
            alert_id,
        }),
    ))
}

pub async fn send_command(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(device_id): Path<i64>,
    Json(payload): Json<CommandRequest>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    if payload.command.trim().is_empty() {
        return Err(ServerError::new(StatusCode::BAD_REQUEST, "command is required"));
    }
    let target = device::get_device(&state.db, device_id).await?;
    let message = json!({
        "command": payload.command.trim(),
        "parameters": payload.parameters,
        "issued_by": user.id,
        "timestamp": Utc::now(),
    });
    let topic = mqtt::send_command(
        state.publisher.as_ref(),
        &state.settings.mqtt.topic_prefix,
        &target,
        &message,
    )
    .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"message": "Command sent", "topic": topic})),
    ))
}
