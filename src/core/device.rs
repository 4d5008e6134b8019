//! Device business logic - registry, status reporting and maintenance checks.
//!
//! Devices are keyed by their hardware serial, which is also the id segment of
//! the MQTT topics they publish on.

use crate::{
    core::string_enum,
    entities::{Device, device},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, QueryOrder, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

string_enum! {
    /// Supported hardware.
    pub enum DeviceType {
        Esp32Monitor => "esp32_monitor",
        ArduinoConveyor => "arduino_conveyor",
        RaspberryQc => "raspberry_qc",
        Printer => "printer",
        SensorTemperature => "sensor_temperature",
        SensorHumidity => "sensor_humidity",
        SensorWeight => "sensor_weight",
    }
}

impl DeviceType {
    /// Second segment of the device's MQTT topics.
    #[must_use]
    pub const fn topic_segment(self) -> &'static str {
        match self {
            Self::Esp32Monitor => "esp32",
            Self::ArduinoConveyor => "arduino",
            Self::RaspberryQc => "raspberry",
            Self::Printer => "printer",
            Self::SensorTemperature | Self::SensorHumidity | Self::SensorWeight => "sensor",
        }
    }
}

string_enum! {
    pub enum DeviceStatus {
        Online => "online",
        Offline => "offline",
        Error => "error",
        Maintenance => "maintenance",
        Updating => "updating",
        Unknown => "unknown",
    }
}

/// Resource usage above this percentage calls for maintenance.
const RESOURCE_LIMIT: f64 = 90.0;
/// Battery below this percentage calls for maintenance.
const BATTERY_LIMIT: f64 = 20.0;

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDevice {
    pub serial_number: String,
    pub name: String,
    pub device_type: DeviceType,
    pub mac_address: Option<String>,
    pub location: Option<String>,
    pub firmware_version: Option<String>,
    pub ip_address: Option<String>,
    /// Defaults to the preset for `device_type`
    pub config: Option<Value>,
}

/// Partial update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    pub firmware_version: Option<String>,
    pub ip_address: Option<String>,
    pub config: Option<Value>,
}

/// Status report sent by a device or an operator.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    pub status: DeviceStatus,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub battery_level: Option<f64>,
    /// Keys merged into the device config
    pub extra: Option<Map<String, Value>>,
}

impl StatusReport {
    #[must_use]
    pub const fn status(status: DeviceStatus) -> Self {
        Self {
            status,
            cpu_usage: None,
            memory_usage: None,
            battery_level: None,
            extra: None,
        }
    }
}

/// Fleet overview.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeviceStats {
    pub total: u64,
    pub online: u64,
    pub needs_maintenance: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

/// Default configuration written for a new device of `device_type`.
#[must_use]
pub fn default_config(device_type: DeviceType, serial_number: &str) -> Value {
    match device_type {
        DeviceType::Esp32Monitor => json!({
            "mqtt_topic": format!("3dpot/esp32/{serial_number}/weight"),
            "calibration": {"zero_point": 0, "scale_factor": 1.0},
            "alerts": {"min_weight": 10, "max_weight": 1000},
        }),
        DeviceType::ArduinoConveyor => json!({
            "motor_settings": {"speed": 100, "acceleration": 50},
            "sensors": {"ir_threshold": 500, "limit_switches": true},
            "safety": {"max_runtime": 3600, "emergency_stop": true},
        }),
        DeviceType::RaspberryQc => json!({
            "camera": {"resolution": [1920, 1080], "fps": 30},
            "inspection": {"pass_score": 0.8},
        }),
        _ => json!({}),
    }
}

/// Status error, CPU or memory above 90% or battery below 20%.
#[must_use]
pub fn needs_maintenance(model: &device::Model) -> bool {
    model.status == DeviceStatus::Error.as_str()
        || model.cpu_usage.is_some_and(|v| v > RESOURCE_LIMIT)
        || model.memory_usage.is_some_and(|v| v > RESOURCE_LIMIT)
        || model.battery_level.is_some_and(|v| v < BATTERY_LIMIT)
}

/// Parsed device type of a stored row.
pub fn device_type_of(model: &device::Model) -> Result<DeviceType> {
    model.device_type.parse()
}

fn validate_percentage(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(Error::validation(format!(
            "{field} must be between 0 and 100"
        ))),
        _ => Ok(()),
    }
}

/// Registers a device. Serial numbers and MAC addresses must be unique.
pub async fn register_device(
    db: &DatabaseConnection,
    owner_id: Option<i64>,
    new_device: NewDevice,
) -> Result<device::Model> {
    let serial = new_device.serial_number.trim().to_string();
    if serial.is_empty() || serial.contains('/') || serial.contains('+') || serial.contains('#') {
        return Err(Error::validation(
            "Serial number must be non-empty and free of MQTT topic characters",
        ));
    }
    if new_device.name.trim().is_empty() {
        return Err(Error::validation("Device name cannot be empty"));
    }

    if Device::find()
        .filter(device::Column::SerialNumber.eq(serial.as_str()))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::Conflict {
            message: format!("Device with serial {serial} already exists"),
        });
    }
    if let Some(mac) = &new_device.mac_address {
        if Device::find()
            .filter(device::Column::MacAddress.eq(mac.as_str()))
            .one(db)
            .await?
            .is_some()
        {
            return Err(Error::Conflict {
                message: format!("Device with MAC {mac} already exists"),
            });
        }
    }

    let now = Utc::now();
    let config = new_device
        .config
        .unwrap_or_else(|| default_config(new_device.device_type, &serial));
    let created = device::ActiveModel {
        serial_number: Set(serial),
        name: Set(new_device.name.trim().to_string()),
        device_type: Set(new_device.device_type.as_str().to_string()),
        status: Set(DeviceStatus::Unknown.as_str().to_string()),
        mac_address: Set(new_device.mac_address),
        location: Set(new_device.location),
        firmware_version: Set(new_device.firmware_version),
        ip_address: Set(new_device.ip_address),
        cpu_usage: Set(None),
        memory_usage: Set(None),
        battery_level: Set(None),
        config: Set(config),
        owner_id: Set(owner_id),
        last_seen: Set(None),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(device_id = created.id, serial = %created.serial_number, "device registered");
    Ok(created)
}

/// Registers an ESP32 filament monitor with its default configuration.
pub async fn create_esp32_monitor(
    db: &DatabaseConnection,
    owner_id: Option<i64>,
    serial_number: &str,
    name: &str,
    location: Option<String>,
) -> Result<device::Model> {
    register_device(
        db,
        owner_id,
        NewDevice {
            serial_number: serial_number.to_string(),
            name: name.to_string(),
            device_type: DeviceType::Esp32Monitor,
            mac_address: None,
            location,
            firmware_version: None,
            ip_address: None,
            config: None,
        },
    )
    .await
}

/// Registers an Arduino conveyor with its default configuration.
pub async fn create_conveyor(
    db: &DatabaseConnection,
    owner_id: Option<i64>,
    serial_number: &str,
    name: &str,
    location: Option<String>,
) -> Result<device::Model> {
    register_device(
        db,
        owner_id,
        NewDevice {
            serial_number: serial_number.to_string(),
            name: name.to_string(),
            device_type: DeviceType::ArduinoConveyor,
            mac_address: None,
            location,
            firmware_version: None,
            ip_address: None,
            config: None,
        },
    )
    .await
}

pub async fn get_device(db: &DatabaseConnection, device_id: i64) -> Result<device::Model> {
    Device::find_by_id(device_id)
        .filter(device::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("device", device_id))
}

/// Finds a live device by serial number, returning None if unknown.
pub async fn find_by_serial(
    db: &DatabaseConnection,
    serial_number: &str,
) -> Result<Option<device::Model>> {
    Device::find()
        .filter(device::Column::SerialNumber.eq(serial_number))
        .filter(device::Column::IsDeleted.eq(false))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All live devices ordered by type then name.
pub async fn list_devices(
    db: &DatabaseConnection,
    device_type: Option<DeviceType>,
    status: Option<DeviceStatus>,
) -> Result<Vec<device::Model>> {
    let mut query = Device::find().filter(device::Column::IsDeleted.eq(false));
    if let Some(device_type) = device_type {
        query = query.filter(device::Column::DeviceType.eq(device_type.as_str()));
    }
    if let Some(status) = status {
        query = query.filter(device::Column::Status.eq(status.as_str()));
    }
    query
        .order_by_asc(device::Column::DeviceType)
        .order_by_asc(device::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

pub async fn update_device(
    db: &DatabaseConnection,
    device_id: i64,
    update: DeviceUpdate,
) -> Result<device::Model> {
    let model = get_device(db, device_id).await?;
    let mut active: device::ActiveModel = model.into();
    if let Some(name) = update.name {
        if name.trim().is_empty() {
            return Err(Error::validation("Device name cannot be empty"));
        }
        active.name = Set(name.trim().to_string());
    }
    if let Some(location) = update.location {
        active.location = Set(Some(location));
    }
    if let Some(firmware) = update.firmware_version {
        active.firmware_version = Set(Some(firmware));
    }
    if let Some(ip) = update.ip_address {
        active.ip_address = Set(Some(ip));
    }
    if let Some(config) = update.config {
        if !config.is_object() {
            return Err(Error::validation("Device config must be a JSON object"));
        }
        active.config = Set(config);
    }
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}

/// Records a status report, touching `last_seen` and merging extra config keys.
pub async fn update_status(
    db: &DatabaseConnection,
    device_id: i64,
    report: StatusReport,
) -> Result<device::Model> {
    validate_percentage("cpu_usage", report.cpu_usage)?;
    validate_percentage("memory_usage", report.memory_usage)?;
    validate_percentage("battery_level", report.battery_level)?;

    let model = get_device(db, device_id).await?;
    let previous = model.status.clone();
    let now = Utc::now();

    let mut config = match &model.config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let merge = report.extra.is_some();
    if let Some(extra) = report.extra {
        config.extend(extra);
    }

    let mut active: device::ActiveModel = model.into();
    active.status = Set(report.status.as_str().to_string());
    active.last_seen = Set(Some(now));
    active.updated_at = Set(now);
    if let Some(cpu) = report.cpu_usage {
        active.cpu_usage = Set(Some(cpu));
    }
    if let Some(memory) = report.memory_usage {
        active.memory_usage = Set(Some(memory));
    }
    if let Some(battery) = report.battery_level {
        active.battery_level = Set(Some(battery));
    }
    if merge {
        active.config = Set(Value::Object(config));
    }
    let updated = active.update(db).await?;

    if previous == updated.status {
        debug!(device_id, status = %updated.status, "device status refreshed");
    } else {
        info!(device_id, from = %previous, to = %updated.status, "device status changed");
    }
    Ok(updated)
}

/// Marks devices not seen since `cutoff` as offline and returns how many changed.
pub async fn mark_stale_offline(db: &DatabaseConnection, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = Device::update_many()
        .col_expr(
            device::Column::Status,
            Expr::value(DeviceStatus::Offline.as_str()),
        )
        .filter(device::Column::IsDeleted.eq(false))
        .filter(device::Column::Status.eq(DeviceStatus::Online.as_str()))
        .filter(device::Column::LastSeen.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Soft deletes the device.
pub async fn delete_device(db: &DatabaseConnection, device_id: i64) -> Result<()> {
    let model = get_device(db, device_id).await?;
    let mut active: device::ActiveModel = model.into();
    active.is_deleted = Set(true);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    info!(device_id, "device deleted");
    Ok(())
}

/// Counts live devices by status and type.
pub async fn device_stats(db: &DatabaseConnection) -> Result<DeviceStats> {
    let devices = list_devices(db, None, None).await?;
    let mut stats = DeviceStats::default();
    for model in &devices {
        stats.total += 1;
        *stats.by_status.entry(model.status.clone()).or_default() += 1;
        *stats.by_type.entry(model.device_type.clone()).or_default() += 1;
        if model.status == DeviceStatus::Online.as_str() {
            stats.online += 1;
        }
        if needs_maintenance(model) {
            stats.needs_maintenance += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_register_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_esp32_monitor(&db, None, "bad/serial", "Scale", None).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        let result = create_esp32_monitor(&db, None, "ESP-1", "  ", None).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_register_presets_and_duplicates() -> Result<()> {
        let db = setup_test_db().await?;
        let scale = create_esp32_monitor(&db, None, "ESP-001", "Scale", None).await?;
        assert_eq!(scale.status, "unknown");
        assert_eq!(
            scale.config["mqtt_topic"],
            json!("3dpot/esp32/ESP-001/weight")
        );
        assert_eq!(scale.config["alerts"]["min_weight"], json!(10));

        let conveyor = create_conveyor(&db, None, "ARD-001", "Belt", None).await?;
        assert_eq!(conveyor.config["safety"]["emergency_stop"], json!(true));

        let duplicate = create_esp32_monitor(&db, None, "ESP-001", "Again", None).await;
        assert!(matches!(duplicate, Err(Error::Conflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_merges_config() -> Result<()> {
        let db = setup_test_db().await?;
        let scale = create_esp32_monitor(&db, None, "ESP-001", "Scale", None).await?;

        let mut extra = Map::new();
        extra.insert("wifi_rssi".to_string(), json!(-61));
        let updated = update_status(
            &db,
            scale.id,
            StatusReport {
                status: DeviceStatus::Online,
                cpu_usage: Some(35.0),
                memory_usage: None,
                battery_level: Some(15.0),
                extra: Some(extra),
            },
        )
        .await?;
        assert_eq!(updated.status, "online");
        assert!(updated.last_seen.is_some());
        assert_eq!(updated.config["wifi_rssi"], json!(-61));
        assert_eq!(updated.config["calibration"]["scale_factor"], json!(1.0));
        assert!(needs_maintenance(&updated));

        let bad = update_status(
            &db,
            scale.id,
            StatusReport {
                cpu_usage: Some(130.0),
                ..StatusReport::status(DeviceStatus::Online)
            },
        )
        .await;
        assert!(matches!(bad, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_and_stale_devices() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_esp32_monitor(&db, None, "ESP-001", "Scale A", None).await?;
        let b = create_esp32_monitor(&db, None, "ESP-002", "Scale B", None).await?;
        let c = create_conveyor(&db, None, "ARD-001", "Belt", None).await?;
        update_status(&db, a.id, StatusReport::status(DeviceStatus::Online)).await?;
        update_status(&db, b.id, StatusReport::status(DeviceStatus::Error)).await?;
        delete_device(&db, c.id).await?;

        let stats = device_stats(&db).await?;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.needs_maintenance, 1);
        assert_eq!(stats.by_type.get("esp32_monitor"), Some(&2));
        assert!(matches!(
            get_device(&db, c.id).await,
            Err(Error::NotFound { .. })
        ));

        let changed = mark_stale_offline(&db, Utc::now() + Duration::seconds(1)).await?;
        assert_eq!(changed, 1);
        assert_eq!(get_device(&db, a.id).await?.status, "offline");

        let listed = list_devices(&db, Some(DeviceType::Esp32Monitor), None).await?;
        let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Scale A", "Scale B"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_device_rejects_non_object_config() -> Result<()> {
        let db = setup_test_db().await?;
        let scale = create_esp32_monitor(&db, None, "ESP-001", "Scale", None).await?;
        let result = update_device(
            &db,
            scale.id,
            DeviceUpdate {
                config: Some(json!([1, 2])),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let renamed = update_device(
            &db,
            scale.id,
            DeviceUpdate {
                name: Some("Spool scale".to_string()),
                location: Some("Bench 2".to_string()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(renamed.name, "Spool scale");
        assert_eq!(renamed.location.as_deref(), Some("Bench 2"));
        Ok(())
    }

    #[test]
    fn test_topic_segments() {
        assert_eq!(DeviceType::Esp32Monitor.topic_segment(), "esp32");
        assert_eq!(DeviceType::ArduinoConveyor.topic_segment(), "arduino");
        assert_eq!(DeviceType::RaspberryQc.topic_segment(), "raspberry");
        assert_eq!(DeviceType::SensorHumidity.topic_segment(), "sensor");
    }
}
