//! Device entity - Hardware that reports over MQTT (filament scales,
//! conveyors, QC stations, printers and standalone sensors).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Device database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Hardware serial; also the device id segment of MQTT topics
    #[sea_orm(unique)]
    pub serial_number: String,
    pub name: String,
    /// See `core::device::DeviceType`
    pub device_type: String,
    /// See `core::device::DeviceStatus`
    pub status: String,
    #[sea_orm(unique)]
    pub mac_address: Option<String>,
    pub location: Option<String>,
    pub firmware_version: Option<String>,
    pub ip_address: Option<String>,
    /// Percent
    pub cpu_usage: Option<f64>,
    /// Percent
    pub memory_usage: Option<f64>,
    /// Percent
    pub battery_level: Option<f64>,
    /// Device specific configuration object
    pub config: Json,
    pub owner_id: Option<i64>,
    /// Last time the device reported anything
    pub last_seen: Option<DateTimeUtc>,
    pub is_deleted: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One device has many telemetry samples
    #[sea_orm(has_many = "super::device_telemetry::Entity")]
    Telemetry,
    /// One device has many alerts
    #[sea_orm(has_many = "super::alert::Entity")]
    Alerts,
}

impl Related<super::device_telemetry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Telemetry.def()
    }
}

impl Related<super::alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Alerts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
