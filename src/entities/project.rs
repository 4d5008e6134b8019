//! Project entity - A customer print/build job moving from draft to completion.
//!
//! Team members and tags are stored as JSON arrays. Projects are soft deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Project database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    /// Unique identifier for the project
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who created and owns the project
    pub owner_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// `prototype`, `production`, `research`, `education` or `commercial`
    pub project_type: String,
    /// See `core::project::ProjectStatus`
    pub status: String,
    /// `low`, `medium`, `high` or `urgent`
    pub priority: String,
    /// Public projects are readable by any authenticated user
    pub is_public: bool,
    /// Completion percentage, 0 to 100
    pub progress: i32,
    pub start_date: Option<DateTimeUtc>,
    pub due_date: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    /// Material name as used by the cost calculator (e.g. `PLA`)
    pub material: Option<String>,
    /// Spool weight in grams before printing
    pub filament_weight_start: Option<f64>,
    /// Spool weight in grams after printing
    pub filament_weight_end: Option<f64>,
    /// Total cost of the filament consumed
    pub filament_cost: Option<f64>,
    /// JSON array of user ids
    pub team_members: Json,
    /// JSON array of strings
    pub tags: Json,
    /// Soft delete flag
    pub is_deleted: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Project and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
    /// One project has many budgets
    #[sea_orm(has_many = "super::budget::Entity")]
    Budgets,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::budget::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Budgets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
