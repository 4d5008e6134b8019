//! Database configuration module.
//!
//! Handles the database connection and table creation using `SeaORM`. Tables are
//! generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust models. `SQLite` is used for development
//! and tests, `PostgreSQL` in production.

use crate::entities::{
    Alert, AuthToken, Budget, Device, DeviceTelemetry, ProductionEvent, ProductionOrder, Project,
    User,
};
use crate::errors::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityName, EntityTrait,
    Schema,
};
use std::time::Duration;
use tracing::{debug, info};

/// Establishes a connection to the database at `database_url`.
///
/// `SQLite` file URLs get their parent directory created first so a fresh
/// checkout can start without manual setup.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    if let Some(path) = database_url
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
    {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(20)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!(backend = ?db.get_database_backend(), "database connected");
    Ok(db)
}

async fn create_table<E, C>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let table = entity.table_name();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    debug!(table, "table ensured");
    Ok(())
}

/// Creates every table that does not exist yet.
///
/// Parents are created before children so foreign keys resolve on backends
/// that enforce them at creation time.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, User).await?;
    create_table(db, &schema, AuthToken).await?;
    create_table(db, &schema, Project).await?;
    create_table(db, &schema, Device).await?;
    create_table(db, &schema, DeviceTelemetry).await?;
    create_table(db, &schema, Alert).await?;
    create_table(db, &schema, Budget).await?;
    create_table(db, &schema, ProductionOrder).await?;
    create_table(db, &schema, ProductionEvent).await?;

    Ok(())
}

/// Runs `SELECT 1` to prove the connection is usable.
pub async fn ping(db: &DatabaseConnection) -> Result<()> {
    db.ping().await.map_err(Into::into)
}
