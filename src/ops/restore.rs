//! Restores a backup described by a manifest.

use crate::{
    config::settings::BackupSettings,
    errors::{Error, Result},
    ops::{
        BackupManifest, CommandRunner, CommandSpec, list_manifest_files, manifest_path,
        manifest_timestamp,
    },
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One entry of [`RestoreService::list_backups`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSummary {
    pub timestamp: String,
    pub date: String,
    pub manifest: PathBuf,
    pub total_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub timestamp: String,
    pub restored_database: bool,
    pub restored_storage: bool,
}

pub struct RestoreService<R> {
    settings: BackupSettings,
    runner: R,
}

impl<R: CommandRunner> RestoreService<R> {
    /// Fails when the backup directory does not exist.
    pub fn new(settings: BackupSettings, runner: R) -> Result<Self> {
        if !settings.backup_dir.is_dir() {
            return Err(Error::Backup {
                message: format!("Backup directory not found: {}", settings.backup_dir.display()),
            });
        }
        Ok(Self { settings, runner })
    }

    /// Available backups, newest first. Unreadable manifests are skipped.
    pub fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        let mut backups = Vec::new();
        for path in list_manifest_files(&self.settings.backup_dir)? {
            match read_manifest(&path) {
                Ok(manifest) => backups.push(BackupSummary {
                    timestamp: manifest.timestamp,
                    date: manifest.backup_date,
                    manifest: path,
                    total_size_mb: manifest.total_size_mb,
                }),
                Err(e) => warn!(manifest = %path.display(), "error reading manifest: {e}"),
            }
        }
        Ok(backups)
    }

    pub fn load_manifest(&self, timestamp: &str) -> Result<BackupManifest> {
        let path = manifest_path(&self.settings.backup_dir, timestamp);
        if !path.exists() {
            return Err(Error::Backup {
                message: format!("Backup manifest not found: {}", path.display()),
            });
        }
        read_manifest(&path)
    }

    /// The database dump must exist; a missing storage archive only warns.
    pub fn verify_files(&self, manifest: &BackupManifest) -> Result<()> {
        info!("verifying backup files");
        if let Some(db_file) = &manifest.database.backup_file {
            if !db_file.exists() {
                error!(file = %db_file.display(), "database backup file not found");
                return Err(Error::Backup {
                    message: format!("Database backup file not found: {}", db_file.display()),
                });
            }
        }
        if let Some(storage_file) = &manifest.storage.backup_file {
            if !storage_file.exists() {
                warn!(file = %storage_file.display(), "storage backup file not found");
            }
        }
        Ok(())
    }

    fn psql(&self, sql: &str) -> Result<()> {
        let port = self.settings.postgres_port.to_string();
        let spec = CommandSpec::new(
            "psql",
            [
                "-h",
                self.settings.postgres_host.as_str(),
                "-p",
                port.as_str(),
                "-U",
                self.settings.postgres_user.as_str(),
                "-d",
                "postgres",
                "-c",
                sql,
            ],
        )
        .env("PGPASSWORD", &self.settings.postgres_password);
        let output = self.runner.run(&spec)?;
        if output.success {
            Ok(())
        } else {
            Err(Error::Backup {
                message: format!("{sql} failed: {}", output.stderr.trim()),
            })
        }
    }

    /// Runs `pg_restore`, first dropping and recreating the database when asked.
    ///
    /// `pg_restore` exits non-zero on ignorable errors too; see [`pg_restore_failed`].
    pub fn restore_database(&self, backup_file: &Path, drop_existing: bool) -> Result<()> {
        info!(file = %backup_file.display(), "restoring database");
        if !backup_file.exists() {
            return Err(Error::Backup {
                message: format!("Backup file not found: {}", backup_file.display()),
            });
        }

        let db_name = &self.settings.postgres_db;
        if drop_existing {
            warn!(database = %db_name, "dropping existing database");
            let ident = quote_ident(db_name);
            self.psql(&format!("DROP DATABASE IF EXISTS {ident}"))?;
            self.psql(&format!("CREATE DATABASE {ident}"))?;
        }

        let port = self.settings.postgres_port.to_string();
        let file = backup_file.display().to_string();
        let mut args = vec![
            "-h",
            self.settings.postgres_host.as_str(),
            "-p",
            port.as_str(),
            "-U",
            self.settings.postgres_user.as_str(),
            "-d",
            db_name.as_str(),
        ];
        // --if-exists is only accepted together with --clean
        if drop_existing {
            args.push("--no-owner");
        } else {
            args.extend(["--clean", "--if-exists"]);
        }
        args.extend(["--verbose", file.as_str()]);
        let spec = CommandSpec::new("pg_restore", args)
            .env("PGPASSWORD", &self.settings.postgres_password);

        let output = self.runner.run(&spec)?;
        if output.success {
            info!("database restore completed");
        } else if pg_restore_failed(&output.stderr) {
            error!(stderr = %output.stderr.trim(), "pg_restore failed");
            return Err(Error::Backup {
                message: format!("Database restore failed: {}", output.stderr.trim()),
            });
        } else {
            warn!("pg_restore completed with warnings");
        }
        Ok(())
    }

    /// Extracts the storage archive next to the storage directory.
    pub fn restore_storage(&self, backup_file: &Path) -> Result<bool> {
        if !backup_file.exists() {
            warn!(file = %backup_file.display(), "storage backup file not found");
            return Ok(false);
        }
        let parent = self
            .settings
            .storage_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let file = backup_file.display().to_string();
        let target = parent.display().to_string();
        let output = self
            .runner
            .run(&CommandSpec::new("tar", ["-xzf", file.as_str(), "-C", target.as_str()]))?;
        if !output.success {
            return Err(Error::Backup {
                message: format!("Storage restore failed: {}", output.stderr.trim()),
            });
        }
        info!("storage restore completed");
        Ok(true)
    }

    /// Restores the backup taken at `timestamp`.
    ///
    /// `drop_existing` is destructive and refused unless `confirm` is set.
    pub fn run(
        &self,
        timestamp: &str,
        skip_storage: bool,
        drop_existing: bool,
        confirm: bool,
    ) -> Result<RestoreOutcome> {
        let manifest = self.load_manifest(timestamp)?;
        info!(backup_date = %manifest.backup_date, "loaded backup manifest");
        self.verify_files(&manifest)?;

        if drop_existing && !confirm {
            error!("dropping the database requires confirmation");
            return Err(Error::Backup {
                message: "Restore cancelled: --drop-existing requires --confirm".to_string(),
            });
        }

        let restored_database = match &manifest.database.backup_file {
            Some(db_file) => {
                self.restore_database(db_file, drop_existing)?;
                true
            }
            None => {
                warn!("no database backup in manifest");
                false
            }
        };

        let restored_storage = match (&manifest.storage.backup_file, skip_storage) {
            (Some(storage_file), false) => self.restore_storage(storage_file)?,
            _ => false,
        };

        info!(timestamp, "restore completed");
        Ok(RestoreOutcome {
            timestamp: timestamp.to_string(),
            restored_database,
            restored_storage,
        })
    }
}

/// Double-quotes a Postgres identifier; names like `3dpot_dev` need it.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A non-zero `pg_restore` exit is tolerated only when stderr carries
/// nothing but `warning:` lines, e.g. "errors ignored on restore".
fn pg_restore_failed(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    if lower.contains("fatal") || lower.contains("error:") {
        return true;
    }
    !lower.lines().any(|line| line.contains("warning:"))
}

fn read_manifest(path: &Path) -> Result<BackupManifest> {
    let manifest: BackupManifest = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    if manifest_timestamp(path) != Some(manifest.timestamp.as_str()) {
        warn!(manifest = %path.display(), "manifest timestamp does not match its file name");
    }
    Ok(manifest)
}
