//! Production order entity - A manufacturing run derived from an approved budget.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Production order database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human readable reference, `PO-YYYYMMDD-<id>`
    #[sea_orm(unique)]
    pub order_number: String,
    pub budget_id: i64,
    pub project_id: i64,
    pub created_by: i64,
    pub quantity: i32,
    /// `prototype`, `batch_small`, `batch_medium` or `batch_large`
    pub production_type: String,
    pub status: String,
    pub priority: String,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    /// `actual_cost - estimated_cost`, set on completion
    pub cost_variance: Option<f64>,
    pub estimated_labor_hours: f64,
    /// JSON array of equipment names
    pub required_equipment: Json,
    pub actual_start: Option<DateTimeUtc>,
    pub actual_end: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub notes: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::budget::Entity",
        from = "Column::BudgetId",
        to = "super::budget::Column::Id"
    )]
    Budget,
    /// One order has many history events
    #[sea_orm(has_many = "super::production_event::Entity")]
    Events,
}

impl Related<super::budget::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Budget.def()
    }
}

impl Related<super::production_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
