//! MQTT bridge between field hardware and the platform.
//!
//! Devices publish on `{prefix}/{device_type}/{serial}/{metric}`. Each message is
//! routed by `(device_type, metric)`, persisted as telemetry, checked against
//! alert thresholds and relayed to WebSocket clients.

/// Broker connection loop and the `rumqttc` command publisher
pub mod bridge;

use crate::{
    config::settings::AlertThresholds,
    core::{
        alert::{self, AlertSeverity, AlertType, NewAlert},
        device::{self, DeviceStatus, StatusReport},
        telemetry,
    },
    entities::device as device_entity,
    errors::{Error, Result},
    realtime::{ConnectionManager, envelope},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// A parsed device topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub device_type: String,
    pub serial: String,
    pub metric: String,
}

/// Splits `{prefix}/{device_type}/{serial}/{metric}`.
///
/// Returns `None` for other prefixes, fewer than four segments or empty parts.
#[must_use]
pub fn parse_topic(prefix: &str, topic: &str) -> Option<Topic> {
    let mut parts = topic.split('/');
    if parts.next()? != prefix {
        return None;
    }
    let device_type = parts.next()?;
    let serial = parts.next()?;
    let metric = parts.next()?;
    if [device_type, serial, metric].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(Topic {
        device_type: device_type.to_string(),
        serial: serial.to_string(),
        metric: metric.to_string(),
    })
}

/// Subscription filter covering every device topic.
#[must_use]
pub fn subscription(prefix: &str) -> String {
    format!("{prefix}/+/+/+")
}

/// Topic a device listens on for commands.
pub fn command_topic(prefix: &str, device: &device_entity::Model) -> Result<String> {
    let device_type = device::device_type_of(device)?;
    Ok(format!(
        "{prefix}/{}/{}/command",
        device_type.topic_segment(),
        device.serial_number
    ))
}

/// Sink for outgoing device commands.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Publisher used when the bridge is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl CommandPublisher for DisabledPublisher {
    async fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<()> {
        Err(Error::Mqtt {
            message: format!("MQTT bridge is disabled, cannot publish to {topic}"),
        })
    }
}

/// Publishes `command` to the device's command topic. Returns the topic.
pub async fn send_command(
    publisher: &dyn CommandPublisher,
    prefix: &str,
    device: &device_entity::Model,
    command: &Value,
) -> Result<String> {
    let topic = command_topic(prefix, device)?;
    publisher
        .publish(&topic, serde_json::to_vec(command)?)
        .await?;
    info!(device_id = device.id, topic = %topic, "command sent");
    Ok(topic)
}

/// What happened to an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Handled {
        device_id: i64,
        /// WebSocket event relayed to clients
        event: Option<&'static str>,
        alert_raised: bool,
    },
    Ignored {
        reason: String,
    },
}

impl DispatchOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WeightPayload {
    #[serde(default)]
    weight_g: f64,
    #[serde(default)]
    percentage: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ConveyorPayload {
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    object_detected: bool,
}

#[derive(Debug, Deserialize)]
struct QcPayload {
    #[serde(default = "unknown_result")]
    result: String,
    #[serde(default)]
    score: f64,
}

fn unknown_result() -> String {
    "unknown".to_string()
}

impl Default for QcPayload {
    fn default() -> Self {
        Self {
            result: unknown_result(),
            score: 0.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatPayload {
    cpu_usage: Option<f64>,
    memory_usage: Option<f64>,
    battery_level: Option<f64>,
}

/// Conveyor state derived from a status message.
#[must_use]
pub fn conveyor_state(speed: f64, object_detected: bool) -> &'static str {
    if object_detected {
        "processing"
    } else if speed == 0.0 {
        "stopped"
    } else {
        "operational"
    }
}

fn parse_payload<T: for<'de> Deserialize<'de> + Default>(payload: &[u8]) -> Result<T> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(payload).map_err(Into::into)
}

/// Routes device messages into the database and out to WebSocket clients.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    db: DatabaseConnection,
    thresholds: AlertThresholds,
    realtime: ConnectionManager,
    prefix: String,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        thresholds: AlertThresholds,
        realtime: ConnectionManager,
        prefix: String,
    ) -> Self {
        Self {
            db,
            thresholds,
            realtime,
            prefix,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Handles one published message.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<DispatchOutcome> {
        let Some(parsed) = parse_topic(&self.prefix, topic) else {
            return Ok(DispatchOutcome::ignored(format!("not a device topic: {topic}")));
        };
        let Some(device) = device::find_by_serial(&self.db, &parsed.serial).await? else {
            debug!(serial = %parsed.serial, "message from unknown device ignored");
            return Ok(DispatchOutcome::ignored(format!(
                "unknown device {}",
                parsed.serial
            )));
        };
        let segment_matches = device::device_type_of(&device)
            .is_ok_and(|t| t.topic_segment() == parsed.device_type);
        if !segment_matches {
            warn!(
                serial = %parsed.serial,
                topic_type = %parsed.device_type,
                device_type = %device.device_type,
                "topic type does not match registered device"
            );
            return Ok(DispatchOutcome::ignored("device type mismatch"));
        }

        match (parsed.device_type.as_str(), parsed.metric.as_str()) {
            ("esp32", "weight") => self.handle_weight(&device, parse_payload(payload)?).await,
            ("arduino", "status") => self.handle_conveyor(&device, parse_payload(payload)?).await,
            ("raspberry", "qc_result") => self.handle_qc(&device, parse_payload(payload)?).await,
            (_, "heartbeat") => self.handle_heartbeat(&device, parse_payload(payload)?).await,
            (device_type, metric) => {
                warn!(device_type, metric, "unsupported MQTT message");
                Ok(DispatchOutcome::ignored(format!(
                    "unsupported message {device_type}/{metric}"
                )))
            }
        }
    }

    async fn mark_online(&self, device: &device_entity::Model, extra: Option<Map<String, Value>>) -> Result<()> {
        let mut report = StatusReport::status(DeviceStatus::Online);
        report.extra = extra;
        device::update_status(&self.db, device.id, report).await?;
        Ok(())
    }

    async fn handle_weight(
        &self,
        device: &device_entity::Model,
        payload: WeightPayload,
    ) -> Result<DispatchOutcome> {
        let meta = Some(json!({"source": "mqtt"}));
        telemetry::record_telemetry(&self.db, device.id, "weight_g", payload.weight_g, Some("g"), meta.clone())
            .await?;
        telemetry::record_telemetry(&self.db, device.id, "percentage", payload.percentage, Some("%"), meta)
            .await?;
        self.mark_online(device, None).await?;
        info!(
            serial = %device.serial_number,
            weight_g = payload.weight_g,
            percentage = payload.percentage,
            "filament weight received"
        );

        let mut alert_raised = false;
        if let Some(breach) = alert::evaluate_thresholds(&self.thresholds, "percentage", payload.percentage) {
            warn!(serial = %device.serial_number, percentage = payload.percentage, "filament low");
            let description = format!(
                "{} reports {:.1}% filament left ({:.0} g)",
                device.name, payload.percentage, payload.weight_g
            );
            alert::raise_alert(&self.db, breach.into_alert(Some(device.id), Some(description))).await?;
            alert_raised = true;
        }

        self.realtime
            .broadcast(
                &envelope(
                    "filament_update",
                    json!({
                        "device_id": device.serial_number,
                        "weight_g": payload.weight_g,
                        "percentage": payload.percentage,
                        "timestamp": Utc::now(),
                    }),
                ),
                None,
            )
            .await;
        Ok(DispatchOutcome::Handled {
            device_id: device.id,
            event: Some("filament_update"),
            alert_raised,
        })
    }

    async fn handle_conveyor(
        &self,
        device: &device_entity::Model,
        payload: ConveyorPayload,
    ) -> Result<DispatchOutcome> {
        let state = conveyor_state(payload.speed, payload.object_detected);
        telemetry::record_telemetry(&self.db, device.id, "speed", payload.speed, None, None).await?;
        telemetry::record_telemetry(
            &self.db,
            device.id,
            "object_detected",
            if payload.object_detected { 1.0 } else { 0.0 },
            None,
            None,
        )
        .await?;
        let mut extra = Map::new();
        extra.insert("conveyor_state".to_string(), json!(state));
        self.mark_online(device, Some(extra)).await?;
        info!(serial = %device.serial_number, state, speed = payload.speed, "conveyor status");

        self.realtime
            .broadcast(
                &envelope(
                    "conveyor_status",
                    json!({
                        "device_id": device.serial_number,
                        "status": state,
                        "speed": payload.speed,
                        "object_detected": payload.object_detected,
                        "timestamp": Utc::now(),
                    }),
                ),
                None,
            )
            .await;
        Ok(DispatchOutcome::Handled {
            device_id: device.id,
            event: Some("conveyor_status"),
            alert_raised: false,
        })
    }

    async fn handle_qc(&self, device: &device_entity::Model, payload: QcPayload) -> Result<DispatchOutcome> {
        let passed = payload.result == "pass";
        telemetry::record_telemetry(
            &self.db,
            device.id,
            "qc_score",
            payload.score,
            Some("%"),
            Some(json!({"result": payload.result})),
        )
        .await?;
        self.mark_online(device, None).await?;

        let mut alert_raised = false;
        if passed {
            info!(serial = %device.serial_number, score = payload.score, "quality check passed");
        } else {
            warn!(serial = %device.serial_number, score = payload.score, result = %payload.result, "quality check failed");
            alert::raise_alert(
                &self.db,
                NewAlert {
                    device_id: Some(device.id),
                    alert_type: AlertType::QualityFailure,
                    severity: AlertSeverity::High,
                    title: "Quality check failed".to_string(),
                    description: Some(format!(
                        "{} reported {} with score {:.1}",
                        device.name, payload.result, payload.score
                    )),
                    threshold_value: None,
                    actual_value: Some(payload.score),
                },
            )
            .await?;
            alert_raised = true;
        }

        self.realtime
            .broadcast(
                &envelope(
                    "qc_result",
                    json!({
                        "device_id": device.serial_number,
                        "result": payload.result,
                        "score": payload.score,
                        "passed": passed,
                        "timestamp": Utc::now(),
                    }),
                ),
                None,
            )
            .await;
        Ok(DispatchOutcome::Handled {
            device_id: device.id,
            event: Some("qc_result"),
            alert_raised,
        })
    }

    async fn handle_heartbeat(
        &self,
        device: &device_entity::Model,
        payload: HeartbeatPayload,
    ) -> Result<DispatchOutcome> {
        let report = StatusReport {
            status: DeviceStatus::Online,
            cpu_usage: payload.cpu_usage,
            memory_usage: payload.memory_usage,
            battery_level: payload.battery_level,
            extra: None,
        };
        device::update_status(&self.db, device.id, report).await?;
        debug!(serial = %device.serial_number, "heartbeat");
        Ok(DispatchOutcome::Handled {
            device_id: device.id,
            event: None,
            alert_raised: false,
        })
    }
}

/// Marks online devices last seen before `now - offline_after` as offline.
pub async fn sweep_stale_devices(
    db: &DatabaseConnection,
    offline_after: Duration,
    now: DateTime<Utc>,
) -> Result<u64> {
    let window = chrono::Duration::from_std(offline_after).unwrap_or(chrono::Duration::MAX);
    let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let changed = device::mark_stale_offline(db, cutoff).await?;
    if changed > 0 {
        info!(changed, "stale devices marked offline");
    }
    Ok(changed)
}

/// Runs [`sweep_stale_devices`] every half `offline_after`.
pub fn spawn_stale_sweep(db: DatabaseConnection, offline_after: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = (offline_after / 2).max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_stale_devices(&db, offline_after, Utc::now()).await {
                error!("stale device sweep failed: {e}");
            }
        }
    })
}
