//! User entity - Accounts that own projects, devices and budgets.
//!
//! Email and username are unique. Lockout state (`failed_login_attempts`,
//! `locked_until`) lives on the row so that every server instance sees it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Lowercased email address
    #[sea_orm(unique)]
    pub email: String,
    /// Login name
    #[sea_orm(unique)]
    pub username: String,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// One of `admin`, `user`, `developer`
    pub role: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub preferred_language: String,
    pub timezone: String,
    /// Consecutive failed logins since the last success
    pub failed_login_attempts: i32,
    /// Logins are refused until this instant
    pub locked_until: Option<DateTimeUtc>,
    pub last_login_at: Option<DateTimeUtc>,
    /// SHA-256 of the API key; the key itself is shown once
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub api_key_created_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user has many issued tokens
    #[sea_orm(has_many = "super::auth_token::Entity")]
    AuthTokens,
    /// One user owns many projects
    #[sea_orm(has_many = "super::project::Entity")]
    Projects,
}

impl Related<super::auth_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuthTokens.def()
    }
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Superusers and members of the `admin` role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.role == "admin"
    }

    /// Whether the account may call the API with an API key.
    #[must_use]
    pub fn can_access_api(&self) -> bool {
        self.is_active && (self.is_superuser || matches!(self.role.as_str(), "admin" | "developer"))
    }

    #[must_use]
    pub fn is_locked(&self, now: DateTimeUtc) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}
