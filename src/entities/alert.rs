//! Alert entity - Threshold breaches and device problems awaiting an operator.
//!
//! Alerts move `active -> acknowledged -> resolved`, or to `dismissed`.
//! Repeats of an open alert bump `recurrence_count` instead of adding rows.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Alert database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub device_id: Option<i64>,
    /// e.g. `weight_low`, `temperature_high`, `quality_failure`
    pub alert_type: String,
    /// `low`, `medium`, `high` or `critical`
    pub severity: String,
    /// `active`, `acknowledged`, `resolved` or `dismissed`
    pub status: String,
    pub title: String,
    pub description: Option<String>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub recurrence_count: i32,
    pub acknowledged_by: Option<i64>,
    pub acknowledged_at: Option<DateTimeUtc>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTimeUtc>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
