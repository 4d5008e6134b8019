//! Handlers for `{type, data}` envelopes received from WebSocket clients.

use crate::{
    config::settings::AlertThresholds,
    core::alert::evaluate_thresholds,
    realtime::manager::{ConnectionManager, envelope},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Map<String, Value>,
}

/// Builds an `error` envelope.
#[must_use]
pub fn error_message(message: &str) -> Value {
    envelope(
        "error",
        json!({"message": message, "timestamp": Utc::now()}),
    )
}

fn success_message(message: &str, extra: Option<Value>) -> Value {
    let mut data = json!({"message": message, "timestamp": Utc::now()});
    if let (Some(Value::Object(extra)), Value::Object(data)) = (extra, &mut data) {
        data.extend(extra);
    }
    envelope("success", data)
}

/// Non-empty string or number field, rendered as a string.
fn id_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn command_action(command: &str, parameters: &Value) -> Value {
    match command {
        "restart" => json!({"action": "restart", "delay": 5}),
        "reset" => json!({"action": "factory_reset"}),
        "calibrate" => json!({
            "action": "start_calibration",
            "sensors": parameters.get("sensors").cloned().unwrap_or_else(|| json!([])),
        }),
        "update_config" => json!({
            "action": "config_update",
            "config": parameters.get("config").cloned().unwrap_or_else(|| json!({})),
        }),
        "get_status" => json!({"action": "status_request"}),
        "test_sensors" => json!({
            "action": "sensor_test",
            "duration": parameters.get("duration").cloned().unwrap_or_else(|| json!(10)),
        }),
        _ => json!({"action": "unknown_command"}),
    }
}

/// Handles one text frame from `connection_id`. Replies go through the manager.
pub async fn handle_text(
    manager: &ConnectionManager,
    thresholds: &AlertThresholds,
    connection_id: &str,
    text: &str,
) {
    let incoming: Incoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!(connection_id, "malformed websocket message: {e}");
            manager
                .send_to(connection_id, &error_message("Invalid JSON message"))
                .await;
            return;
        }
    };
    let reply = |message: Value| async move { manager.send_to(connection_id, &message).await };
    let data = &incoming.data;

    match incoming.kind.as_str() {
        "ping" | "keepalive" => {
            reply(envelope("pong", json!({"timestamp": Utc::now()}))).await;
        }
        "join_room" | "leave_room" => {
            let Some(room) = id_field(data, "room") else {
                reply(error_message("room is required")).await;
                return;
            };
            if incoming.kind == "join_room" {
                manager.join_room(connection_id, &room).await;
                let members = manager.room_members(&room).await;
                reply(success_message(
                    "Joined room",
                    Some(json!({"room": room, "members": members})),
                ))
                .await;
            } else {
                manager.leave_room(connection_id, &room).await;
                reply(success_message("Left room", Some(json!({"room": room})))).await;
            }
        }
        "device_connect" => {
            let Some(device_id) = id_field(data, "device_id") else {
                reply(error_message("device_id is required")).await;
                return;
            };
            manager.attach_device(connection_id, &device_id).await;
            reply(success_message(
                "Device connected successfully",
                Some(json!({"device_id": device_id, "server_time": Utc::now()})),
            ))
            .await;
        }
        "sensor_data" => {
            let device_id = id_field(data, "device_id");
            let sensor_type = id_field(data, "sensor_type");
            let value = data.get("value").and_then(Value::as_f64);
            let (Some(device_id), Some(sensor_type), Some(value)) = (device_id, sensor_type, value)
            else {
                reply(error_message("device_id, sensor_type, and value are required")).await;
                return;
            };
            let data_id = uuid::Uuid::new_v4().to_string();
            let reading = json!({
                "device_id": device_id,
                "sensor_type": sensor_type,
                "value": value,
                "unit": data.get("unit").cloned().unwrap_or(Value::Null),
                "timestamp": data.get("timestamp").cloned().unwrap_or_else(|| json!(Utc::now())),
                "connection_id": connection_id,
                "data_id": data_id,
            });
            manager
                .send_to_room(&format!("device_{device_id}"), &envelope("sensor_data", reading), None)
                .await;
            if let Some(breach) = evaluate_thresholds(thresholds, &sensor_type, value) {
                let alert = json!({
                    "device_id": device_id,
                    "sensor_type": sensor_type,
                    "value": value,
                    "threshold": breach.threshold,
                    "severity": breach.severity,
                    "timestamp": Utc::now(),
                });
                manager.broadcast(&envelope("sensor_alert", alert), None).await;
            }
            reply(success_message("Sensor data received", Some(json!({"data_id": data_id})))).await;
        }
        "device_status" => {
            let Some(device_id) = id_field(data, "device_id") else {
                reply(error_message("device_id is required")).await;
                return;
            };
            let update = json!({
                "device_id": device_id,
                "status": data.get("status").cloned().unwrap_or(Value::Null),
                "battery_level": data.get("battery_level").cloned().unwrap_or(Value::Null),
                "signal_strength": data.get("signal_strength").cloned().unwrap_or(Value::Null),
                "timestamp": Utc::now(),
            });
            manager
                .broadcast(&envelope("device_status_update", update), None)
                .await;
            reply(success_message("Status updated", None)).await;
        }
        "device_command" => {
            let device_id = id_field(data, "device_id");
            let command = id_field(data, "command");
            let (Some(device_id), Some(command)) = (device_id, command) else {
                reply(error_message("device_id and command are required")).await;
                return;
            };
            let parameters = data.get("parameters").cloned().unwrap_or_else(|| json!({}));
            let result = command_action(&command, &parameters);
            manager
                .send_to_device(
                    &device_id,
                    &envelope(
                        "command_result",
                        json!({"command": command, "result": result, "timestamp": Utc::now()}),
                    ),
                )
                .await;
            reply(success_message(
                "Command sent",
                Some(json!({"command": command, "result": result})),
            ))
            .await;
        }
        other => {
            warn!(connection_id, message_type = other, "unsupported websocket message");
            reply(error_message(&format!("Unsupported message type: {other}"))).await;
        }
    }
}
