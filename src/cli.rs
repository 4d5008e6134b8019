//! Command line interface: the API server plus the operational commands.

use crate::{
    api::{self, AppState},
    config::{Settings, database, settings::DEFAULT_CONFIG_PATH},
    core::auth::{self, Role},
    errors::{Error, Result},
    mqtt::{self, CommandPublisher, DisabledPublisher, Dispatcher, bridge},
    ops::{SystemRunner, backup::BackupService, openscad, restore::RestoreService, sample_data},
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "threedpot", version, about = "3dPot platform backend and operations tooling")]
pub struct Cli {
    /// Settings file
    #[arg(short, long, global = true, env = "THREEDPOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP, WebSocket and MQTT services
    Serve,
    /// Dump the database and archive the storage directory
    Backup {
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        #[arg(long)]
        skip_storage: bool,
        /// Backups to keep (defaults to backup.keep)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Restore a backup by timestamp, or list the available ones
    Restore {
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        #[arg(long)]
        list: bool,
        #[arg(long, required_unless_present = "list")]
        timestamp: Option<String>,
        #[arg(long)]
        skip_storage: bool,
        /// Drop and recreate the database first (needs --confirm)
        #[arg(long)]
        drop_existing: bool,
        #[arg(long)]
        confirm: bool,
    },
    /// Static syntax checks for OpenSCAD models
    ValidateScad {
        #[arg(default_value = "models")]
        dir: PathBuf,
        #[arg(long, default_value = "openscad_validation_report.json")]
        report: PathBuf,
    },
    /// Fill the database with demo data
    SampleData {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Also write the CI workflow monitoring document here
        #[arg(long)]
        workflows_out: Option<PathBuf>,
    },
    /// Delete expired and revoked tokens
    CleanupTokens,
    /// Change an account's role (admin, user or developer)
    SetRole {
        /// Username or email
        login: String,
        role: String,
    },
}

/// Runs `command` to completion and returns the process exit code.
pub async fn run(command: Command, settings: Settings) -> Result<u8> {
    match command {
        Command::Serve => serve(settings).await.map(|()| 0),
        Command::Backup {
            backup_dir,
            skip_storage,
            keep,
        } => {
            let mut backup = settings.backup;
            if let Some(dir) = backup_dir {
                backup.backup_dir = dir;
            }
            let keep = keep.unwrap_or(backup.keep);
            if keep == 0 {
                return Err(Error::validation("--keep must be at least 1"));
            }
            let outcome = blocking(move || {
                BackupService::new(backup, SystemRunner)?.run(skip_storage, keep)
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(0)
        }
        Command::Restore {
            backup_dir,
            list,
            timestamp,
            skip_storage,
            drop_existing,
            confirm,
        } => {
            let mut backup = settings.backup;
            if let Some(dir) = backup_dir {
                backup.backup_dir = dir;
            }
            let service = RestoreService::new(backup, SystemRunner)?;
            if list {
                println!("{}", serde_json::to_string_pretty(&service.list_backups()?)?);
                return Ok(0);
            }
            let timestamp = timestamp.ok_or_else(|| Error::validation("--timestamp is required"))?;
            let outcome = blocking(move || {
                service.run(&timestamp, skip_storage, drop_existing, confirm)
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(0)
        }
        Command::ValidateScad { dir, report } => validate_scad(&dir, &report),
        Command::SampleData {
            seed,
            workflows_out,
        } => {
            let db = open_database(&settings).await?;
            let summary =
                sample_data::seed_database(&db, &settings.auth, &settings.alerts, seed).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if let Some(path) = workflows_out {
                let report = sample_data::generate_workflow_report(seed, Utc::now());
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                info!(
                    path = %path.display(),
                    recommendations = report.recommendations.len(),
                    "workflow report written"
                );
            }
            Ok(0)
        }
        Command::CleanupTokens => {
            let db = open_database(&settings).await?;
            let removed = auth::cleanup_expired_tokens(&db).await?;
            println!("removed {removed} tokens");
            Ok(0)
        }
        Command::SetRole { login, role } => {
            let role: Role = role.parse()?;
            let db = open_database(&settings).await?;
            let account = auth::find_user_by_login(&db, &login)
                .await?
                .ok_or_else(|| Error::not_found("user", &login))?;
            let updated = auth::set_role(&db, account.id, role).await?;
            info!(user_id = updated.id, role = %role, "role changed");
            println!("{} is now {}", updated.username, updated.role);
            Ok(0)
        }
    }
}

fn validate_scad(dir: &Path, report_path: &Path) -> Result<u8> {
    let report = openscad::validate_dir(dir)?;
    report.write_json(report_path)?;
    for file in &report.error_files {
        for message in &file.errors {
            error!(file = %file.name, "{message}");
        }
    }
    info!(
        total = report.total_files,
        valid = report.valid_files.len(),
        invalid = report.error_files.len(),
        warnings = report.files_with_warnings.len(),
        "OpenSCAD validation finished"
    );
    Ok(report.exit_code())
}

/// Subprocess-heavy work runs off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Backup {
            message: format!("background task failed: {e}"),
        })?
}

async fn open_database(settings: &Settings) -> Result<DatabaseConnection> {
    let db = database::create_connection(&settings.database.url).await?;
    database::create_tables(&db).await?;
    Ok(db)
}

async fn serve(settings: Settings) -> Result<()> {
    let db = open_database(&settings).await?;
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| Error::Config {
            message: format!("invalid listen address: {e}"),
        })?;

    let state = if settings.mqtt.enabled {
        let (client, event_loop) = bridge::connect(&settings.mqtt)?;
        let connected = Arc::new(AtomicBool::new(false));
        let publisher: Arc<dyn CommandPublisher> =
            Arc::new(bridge::MqttPublisher::new(client.clone()));
        let state = AppState::new(db, settings, publisher, Some(Arc::clone(&connected)));
        let dispatcher = Dispatcher::new(
            state.db.clone(),
            state.settings.alerts.clone(),
            state.realtime.clone(),
            state.settings.mqtt.topic_prefix.clone(),
        );
        let delay = Duration::from_secs(state.settings.mqtt.reconnect_delay_secs.max(1));
        tokio::spawn(bridge::run(client, event_loop, dispatcher, connected, delay));
        info!(broker = %state.settings.mqtt.broker_url, "MQTT bridge started");
        state
    } else {
        warn!("MQTT disabled, device commands will be rejected");
        AppState::new(db, settings, Arc::new(DisabledPublisher), None)
    };

    api::rate_limit::spawn_cleanup(Arc::clone(&state.rate_limits));
    mqtt::spawn_stale_sweep(
        state.db.clone(),
        Duration::from_secs(state.settings.mqtt.device_offline_after_secs.max(1)),
    );
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "3dPot API listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["threedpot"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["threedpot", "backup", "--skip-storage", "--keep", "3"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Backup {
                backup_dir: None,
                skip_storage: true,
                keep: Some(3),
            })
        );

        let cli = Cli::try_parse_from(["threedpot", "restore", "--list"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Restore { list: true, .. })));
        assert!(Cli::try_parse_from(["threedpot", "restore"]).is_err());

        let cli = Cli::try_parse_from(["threedpot", "-c", "prod.toml", "validate-scad", "models/"]).unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("prod.toml"));
        assert!(matches!(
            cli.command,
            Some(Command::ValidateScad { ref dir, .. }) if dir == Path::new("models/")
        ));
    }

    #[tokio::test]
    async fn test_validate_scad_exit_code() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("ok.scad"), "module ok() { cube(1); }\n")?;
        let report = dir.path().join("report.json");

        let command = Command::ValidateScad {
            dir: dir.path().to_path_buf(),
            report: report.clone(),
        };
        assert_eq!(run(command.clone(), Settings::default()).await?, 0);
        assert!(report.exists());

        std::fs::write(dir.path().join("broken.scad"), "module broken() {\n")?;
        assert_eq!(run(command, Settings::default()).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_sample_data_and_cleanup() -> Result<()> {
        let dir = TempDir::new()?;
        let mut settings = Settings::default();
        settings.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("demo.sqlite").display());
        let workflows = dir.path().join("workflows.json");

        let command = Command::SampleData {
            seed: 5,
            workflows_out: Some(workflows.clone()),
        };
        assert_eq!(run(command, settings.clone()).await?, 0);
        let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(workflows)?)?;
        assert_eq!(report["workflows"].as_array().unwrap().len(), 5);

        assert_eq!(run(Command::CleanupTokens, settings.clone()).await?, 0);

        let promote = Command::SetRole {
            login: "demo_maker".to_string(),
            role: "developer".to_string(),
        };
        assert_eq!(run(promote, settings.clone()).await?, 0);
        let bad_role = Command::SetRole {
            login: "demo_maker".to_string(),
            role: "wizard".to_string(),
        };
        assert!(matches!(run(bad_role, settings.clone()).await, Err(Error::Validation { .. })));
        let nobody = Command::SetRole {
            login: "nobody".to_string(),
            role: "admin".to_string(),
        };
        assert!(matches!(run(nobody, settings).await, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_keep_must_be_positive() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.backup.backup_dir = dir.path().join("backups");
        let command = Command::Backup {
            backup_dir: None,
            skip_storage: true,
            keep: Some(0),
        };
        assert!(matches!(run(command, settings).await, Err(Error::Validation { .. })));
        assert!(!dir.path().join("backups").exists());
    }
}
