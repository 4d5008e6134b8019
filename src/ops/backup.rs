//! PostgreSQL and storage backups with a JSON manifest and count-based retention.

use crate::{
    config::settings::BackupSettings,
    errors::{Error, Result},
    ops::{
        BackupManifest, CommandRunner, CommandSpec, DatabaseBackup, StorageBackup,
        list_manifest_files, manifest_path, size_mb,
    },
};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Files produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupOutcome {
    pub timestamp: String,
    pub db_backup: PathBuf,
    pub storage_backup: Option<PathBuf>,
    pub manifest: PathBuf,
    /// Manifests removed by retention
    pub removed: usize,
}

pub struct BackupService<R> {
    settings: BackupSettings,
    runner: R,
}

impl<R: CommandRunner> BackupService<R> {
    /// Creates the backup directory if needed.
    pub fn new(settings: BackupSettings, runner: R) -> Result<Self> {
        std::fs::create_dir_all(&settings.backup_dir)?;
        info!(backup_dir = %settings.backup_dir.display(), "backup service initialized");
        Ok(Self { settings, runner })
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    /// Free megabytes on the backup filesystem, read from `df -Pm`.
    pub fn available_mb(&self) -> Result<u64> {
        let dir = self.settings.backup_dir.display().to_string();
        let output = self.runner.run(&CommandSpec::new("df", ["-Pm", dir.as_str()]))?;
        if !output.success {
            return Err(Error::Backup {
                message: format!("df failed: {}", output.stderr.trim()),
            });
        }
        parse_df_available(&output.stdout).ok_or_else(|| Error::Backup {
            message: "could not parse df output".to_string(),
        })
    }

    pub fn check_disk_space(&self, required_mb: u64) -> Result<()> {
        let available = self.available_mb()?;
        info!(available_mb = available, "available disk space");
        if available < required_mb {
            error!(required_mb, available_mb = available, "insufficient disk space");
            return Err(Error::Backup {
                message: format!(
                    "Insufficient disk space. Required: {required_mb} MB, available: {available} MB"
                ),
            });
        }
        Ok(())
    }

    /// Dumps the database in custom format to `db_backup_{timestamp}.sql`.
    pub fn backup_database(&self, timestamp: &str) -> Result<PathBuf> {
        info!("starting database backup");
        let file = self
            .settings
            .backup_dir
            .join(format!("db_backup_{timestamp}.sql"));
        let port = self.settings.postgres_port.to_string();
        let target = file.display().to_string();
        let spec = CommandSpec::new(
            "pg_dump",
            [
                "-h",
                self.settings.postgres_host.as_str(),
                "-p",
                port.as_str(),
                "-U",
                self.settings.postgres_user.as_str(),
                "-d",
                self.settings.postgres_db.as_str(),
                "-F",
                "c",
                "-f",
                target.as_str(),
                "--verbose",
            ],
        )
        .env("PGPASSWORD", &self.settings.postgres_password);

        let output = self.runner.run(&spec)?;
        if !output.success {
            error!(stderr = %output.stderr.trim(), "pg_dump failed");
            return Err(Error::Backup {
                message: format!("Database backup failed: {}", output.stderr.trim()),
            });
        }
        info!(file = %file.display(), size_mb = size_mb(&file), "database backup completed");
        Ok(file)
    }

    /// Archives the storage directory. `None` when it does not exist.
    pub fn backup_storage(&self, timestamp: &str) -> Result<Option<PathBuf>> {
        let storage = &self.settings.storage_dir;
        if !storage.exists() {
            warn!(storage_dir = %storage.display(), "storage directory not found, skipping");
            return Ok(None);
        }
        let file = self
            .settings
            .backup_dir
            .join(format!("storage_backup_{timestamp}.tar.gz"));
        let parent = storage
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .display()
            .to_string();
        let name = storage
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::Backup {
                message: format!("invalid storage directory: {}", storage.display()),
            })?;
        let target = file.display().to_string();
        let spec = CommandSpec::new(
            "tar",
            ["-czf", target.as_str(), "-C", parent.as_str(), name.as_str()],
        );

        let output = self.runner.run(&spec)?;
        if !output.success {
            return Err(Error::Backup {
                message: format!("Storage backup failed: {}", output.stderr.trim()),
            });
        }
        info!(file = %file.display(), size_mb = size_mb(&file), "storage backup completed");
        Ok(Some(file))
    }

    pub fn write_manifest(
        &self,
        timestamp: &str,
        db_backup: Option<&Path>,
        storage_backup: Option<&Path>,
    ) -> Result<PathBuf> {
        let db_size = db_backup.map_or(0.0, size_mb);
        let storage_size = storage_backup.map_or(0.0, size_mb);
        let manifest = BackupManifest {
            timestamp: timestamp.to_string(),
            backup_date: Local::now().to_rfc3339(),
            database: DatabaseBackup {
                host: self.settings.postgres_host.clone(),
                port: self.settings.postgres_port,
                database: self.settings.postgres_db.clone(),
                backup_file: db_backup.map(Path::to_path_buf),
                size_mb: db_size,
            },
            storage: StorageBackup {
                backup_file: storage_backup.map(Path::to_path_buf),
                size_mb: storage_size,
            },
            total_size_mb: db_size + storage_size,
        };
        let path = manifest_path(&self.settings.backup_dir, timestamp);
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        info!(manifest = %path.display(), "backup manifest created");
        Ok(path)
    }

    /// Deletes everything but the newest `keep` backups. Returns how many were removed.
    pub fn cleanup_old_backups(&self, keep: usize) -> Result<usize> {
        info!(keep, "cleaning up old backups");
        let manifests = list_manifest_files(&self.settings.backup_dir)?;
        let mut removed = 0;
        for path in manifests.into_iter().skip(keep) {
            match remove_backup(&path) {
                Ok(()) => removed += 1,
                Err(e) => error!(manifest = %path.display(), "error cleaning up backup: {e}"),
            }
        }
        Ok(removed)
    }

    /// Full run stamped with the current local time.
    pub fn run(&self, skip_storage: bool, keep: usize) -> Result<BackupOutcome> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        self.run_at(&timestamp, skip_storage, keep)
    }

    /// Disk check, database dump, optional storage archive, manifest, retention.
    ///
    /// A failing storage archive is logged and left out of the manifest.
    pub fn run_at(&self, timestamp: &str, skip_storage: bool, keep: usize) -> Result<BackupOutcome> {
        info!(timestamp, "starting backup");
        self.check_disk_space(self.settings.required_free_mb)?;

        let db_backup = self.backup_database(timestamp)?;
        let storage_backup = if skip_storage {
            None
        } else {
            self.backup_storage(timestamp).unwrap_or_else(|e| {
                warn!("storage backup failed (non-critical): {e}");
                None
            })
        };

        let manifest = self.write_manifest(timestamp, Some(&db_backup), storage_backup.as_deref())?;
        let removed = self.cleanup_old_backups(keep)?;
        info!(manifest = %manifest.display(), "backup completed");
        Ok(BackupOutcome {
            timestamp: timestamp.to_string(),
            db_backup,
            storage_backup,
            manifest,
            removed,
        })
    }
}

fn remove_backup(manifest_file: &Path) -> Result<()> {
    let manifest: BackupManifest = serde_json::from_str(&std::fs::read_to_string(manifest_file)?)?;
    let files = [manifest.database.backup_file, manifest.storage.backup_file];
    for file in files.into_iter().flatten() {
        if file.exists() {
            std::fs::remove_file(&file)?;
            info!(file = %file.display(), "removed old backup file");
        }
    }
    std::fs::remove_file(manifest_file)?;
    info!(manifest = %manifest_file.display(), "removed old manifest");
    Ok(())
}

/// "Available" column of the first data row of `df -P` output.
fn parse_df_available(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()
}
