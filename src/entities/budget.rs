//! Budget entity - A priced quote for a project.
//!
//! Cost components are stored individually; `breakdown` keeps the
//! per-component detail returned by the cost calculator.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Budget database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub material_cost: f64,
    pub hardware_cost: f64,
    pub labor_cost: f64,
    pub printing_cost: f64,
    /// Sum of the four components
    pub total_cost: f64,
    pub markup_percentage: f64,
    /// `total_cost` with markup applied
    pub final_price: f64,
    pub breakdown: Json,
    /// `draft`, `approved`, `rejected` or `expired`
    pub status: String,
    pub valid_until: DateTimeUtc,
    pub created_by: Option<i64>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each budget belongs to one project
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_many = "super::production_order::Entity")]
    ProductionOrders,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::production_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
