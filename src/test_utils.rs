//! Shared test utilities for the 3dPot backend.
//!
//! Helpers to set up an in-memory database and create entities with sensible
//! defaults.

use crate::{
    config::settings::AuthSettings,
    core::{
        auth::{self, ClientInfo, NewUser, TokenPair},
        budget::{self, BudgetRequest, Complexity, CostCalculator, Dimensions, Specifications},
        device,
        production::{self, NewProductionOrder},
        project::{self, NewProject},
    },
    entities,
    errors::Result,
    mqtt::CommandPublisher,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;

/// Satisfies the default password policy.
pub const TEST_PASSWORD: &str = "Str0ng!Pass";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Registers `username` with email `{username}@example.com` and [`TEST_PASSWORD`].
pub async fn create_test_user(
    db: &DatabaseConnection,
    username: &str,
) -> Result<entities::user::Model> {
    auth::register_user(
        db,
        &AuthSettings::default(),
        NewUser {
            email: format!("{username}@example.com"),
            username: username.to_string(),
            password: TEST_PASSWORD.to_string(),
            full_name: None,
            phone: None,
            company: None,
        },
    )
    .await
}

/// Registers `username` and logs in, returning the user and its tokens.
pub async fn login_test_user(
    db: &DatabaseConnection,
    username: &str,
) -> Result<(entities::user::Model, TokenPair)> {
    create_test_user(db, username).await?;
    auth::authenticate(
        db,
        &AuthSettings::default(),
        username,
        TEST_PASSWORD,
        &ClientInfo::default(),
    )
    .await
}

/// An unsaved active `user` for code paths that fail before touching the database.
pub fn sample_user(id: i64) -> entities::user::Model {
    let now = Utc::now();
    entities::user::Model {
        id,
        email: format!("user{id}@example.com"),
        username: format!("user{id}"),
        hashed_password: String::new(),
        full_name: None,
        phone: None,
        company: None,
        role: "user".to_string(),
        is_active: true,
        is_verified: true,
        is_superuser: false,
        preferred_language: "pt-BR".to_string(),
        timezone: "America/Sao_Paulo".to_string(),
        failed_login_attempts: 0,
        locked_until: None,
        last_login_at: None,
        api_key_hash: None,
        api_key_created_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Creates a private project tagged `test`.
pub async fn create_test_project(
    db: &DatabaseConnection,
    owner: &entities::user::Model,
    name: &str,
) -> Result<entities::project::Model> {
    project::create_project(
        db,
        owner,
        NewProject {
            name: name.to_string(),
            material: Some("PLA".to_string()),
            tags: vec!["test".to_string()],
            ..Default::default()
        },
    )
    .await
}

/// Registers an unowned ESP32 filament monitor.
pub async fn create_test_device(
    db: &DatabaseConnection,
    serial: &str,
) -> Result<entities::device::Model> {
    device::create_esp32_monitor(db, None, serial, &format!("Monitor {serial}"), None).await
}

/// Generates a draft budget for a 50x20x30 mm PLA part of medium complexity.
pub async fn create_test_budget(
    db: &DatabaseConnection,
    owner: &entities::user::Model,
    project_id: i64,
) -> Result<entities::budget::Model> {
    budget::generate_budget(
        db,
        &CostCalculator::default(),
        owner,
        BudgetRequest {
            project_id,
            specifications: Specifications {
                material: Some("PLA".to_string()),
                dimensions: Some(Dimensions::default()),
                complexity: Some(Complexity::Medium),
                include_printing: false,
            },
            ..Default::default()
        },
    )
    .await
}

/// Creates a project, approves a budget for it and opens an order of `quantity`.
pub async fn create_test_order(
    db: &DatabaseConnection,
    owner: &entities::user::Model,
    quantity: u32,
) -> Result<entities::production_order::Model> {
    let project = create_test_project(db, owner, &format!("Batch of {quantity}")).await?;
    let draft = create_test_budget(db, owner, project.id).await?;
    budget::approve_budget(db, owner, draft.id).await?;
    production::create_production_order(
        db,
        owner,
        NewProductionOrder {
            budget_id: draft.id,
            quantity,
            priority: None,
            notes: None,
        },
    )
    .await
}

/// Keeps every published command in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    /// `(topic, payload)` pairs in publish order.
    pub async fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.sent.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}
