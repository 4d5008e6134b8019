//! Operational tooling run from the command line: disaster recovery, model
//! validation and demo data.

pub mod backup;
pub mod openscad;
pub mod restore;
pub mod sample_data;

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Value following `flag` in the argument list.
    #[must_use]
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes subprocesses; swapped for a fake in tests.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(program = %spec.program, args = ?spec.args, "running command");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::Backup {
                    message: format!("{} not found, please install it", spec.program),
                },
                _ => Error::Io(e),
            })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Describes one backup run; written next to the backup files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub timestamp: String,
    pub backup_date: String,
    pub database: DatabaseBackup,
    pub storage: StorageBackup,
    pub total_size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseBackup {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub backup_file: Option<PathBuf>,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageBackup {
    pub backup_file: Option<PathBuf>,
    pub size_mb: f64,
}

/// `backup_manifest_{timestamp}.json` inside `dir`.
pub fn manifest_path(dir: &Path, timestamp: &str) -> PathBuf {
    dir.join(format!("backup_manifest_{timestamp}.json"))
}

/// Timestamp embedded in a manifest file name.
pub fn manifest_timestamp(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix("backup_manifest_")?
        .strip_suffix(".json")
}

/// Manifests in `dir`, newest timestamp first.
pub fn list_manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| manifest_timestamp(path).is_some())
        .collect::<Vec<_>>();
    manifests.sort_by(|a, b| manifest_timestamp(b).cmp(&manifest_timestamp(a)));
    Ok(manifests)
}

/// File size in megabytes, 0 when the file is missing.
pub fn size_mb(path: &Path) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    std::fs::metadata(path).map_or(0.0, |meta| meta.len() as f64 / (1024.0 * 1024.0))
}
