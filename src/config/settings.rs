//! Application settings loaded from `config.toml` with environment overrides.
//!
//! Every section has defaults so a missing file yields a runnable development
//! configuration. Environment variables (usually from `.env`) take precedence
//! over the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Runtime environment the server is deployed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "testing" | "test" => Some(Self::Testing),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
        }
    }
}

/// Complete settings tree.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub environment: Environment,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub mqtt: MqttSettings,
    pub rate_limit: RateLimitSettings,
    pub backup: BackupSettings,
    pub alerts: AlertThresholds,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS; `*` allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://data/3dpot.sqlite?mode=rwc".to_string(),
        }
    }
}

/// Token lifetimes, password policy and account lockout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub secret_key: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub password_min_length: usize,
    pub password_require_uppercase: bool,
    pub password_require_lowercase: bool,
    pub password_require_numbers: bool,
    pub password_require_special: bool,
    pub max_failed_attempts: i32,
    pub lockout_minutes: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_key: "dev-secret-key-change-in-production".to_string(),
            access_token_minutes: 30,
            refresh_token_days: 7,
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_lowercase: true,
            password_require_numbers: true,
            password_require_special: true,
            max_failed_attempts: 5,
            lockout_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Online devices silent for longer than this are marked offline.
    pub device_offline_after_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "3dpot_backend".to_string(),
            username: None,
            password: None,
            topic_prefix: "3dpot".to_string(),
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
            device_offline_after_secs: 300,
        }
    }
}

/// A route prefix with its own, stricter request budget.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointLimit {
    pub path_prefix: String,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_minute: u32,
    /// Bucket capacity; defaults to twice the per-minute rate.
    pub burst: Option<u32>,
    pub endpoints: Vec<EndpointLimit>,
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst: None,
            endpoints: vec![
                EndpointLimit {
                    path_prefix: "/api/v1/auth/login".to_string(),
                    requests_per_minute: 5,
                },
                EndpointLimit {
                    path_prefix: "/api/v1/auth/register".to_string(),
                    requests_per_minute: 3,
                },
            ],
            cleanup_interval_secs: 300,
        }
    }
}

/// Locations and PostgreSQL credentials used by backup and restore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_password: String,
    pub keep: usize,
    pub required_free_mb: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            storage_dir: PathBuf::from("./storage"),
            postgres_host: "localhost".to_string(),
            postgres_port: 5432,
            postgres_db: "3dpot_dev".to_string(),
            postgres_user: "3dpot".to_string(),
            postgres_password: "3dpot123".to_string(),
            keep: 7,
            required_free_mb: 1000,
        }
    }
}

/// Sensor limits that raise alerts when crossed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub temperature_high: f64,
    pub humidity_high: f64,
    pub vibration_high: f64,
    pub filament_low_percentage: f64,
    pub battery_low: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature_high: 70.0,
            humidity_high: 80.0,
            vibration_high: 5.0,
            filament_low_percentage: 20.0,
            battery_low: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (missing file means defaults), then applies
    /// process environment overrides and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut settings = Self::from_file(path)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses the TOML file at `path`, returning defaults when it does not exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("Failed to read config file: {e}"),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse config.toml: {e}"),
        })
    }

    /// Overrides fields from environment variables looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ENVIRONMENT") {
            self.environment = Environment::parse(&value).ok_or_else(|| Error::Config {
                message: format!("Unknown ENVIRONMENT value: {value}"),
            })?;
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.logging.level = value.to_ascii_lowercase();
        }
        if let Some(value) = lookup("HOST") {
            self.server.host = value;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_env("PORT", &value)?;
        }
        if let Some(value) = lookup("ALLOWED_ORIGINS") {
            self.server.allowed_origins = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(value) = lookup("DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = lookup("SECRET_KEY").or_else(|| lookup("JWT_SECRET")) {
            self.auth.secret_key = value;
        }
        if let Some(value) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.auth.access_token_minutes = parse_env("ACCESS_TOKEN_EXPIRE_MINUTES", &value)?;
        }
        if let Some(value) = lookup("REFRESH_TOKEN_EXPIRE_DAYS") {
            self.auth.refresh_token_days = parse_env("REFRESH_TOKEN_EXPIRE_DAYS", &value)?;
        }
        if let Some(value) = lookup("MQTT_ENABLED") {
            self.mqtt.enabled = parse_bool(&value);
        }
        if let Some(value) = lookup("MQTT_BROKER_URL") {
            self.mqtt.broker_url = value;
        }
        if let Some(value) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = value;
        }
        if let Some(value) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(value);
        }
        if let Some(value) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(value);
        }
        if let Some(value) = lookup("RATE_LIMITING_ENABLED") {
            self.rate_limit.enabled = parse_bool(&value);
        }
        if let Some(value) = lookup("RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.requests_per_minute = parse_env("RATE_LIMIT_PER_MINUTE", &value)?;
        }
        if let Some(value) = lookup("BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("STORAGE_DIR") {
            self.backup.storage_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("POSTGRES_HOST") {
            self.backup.postgres_host = value;
        }
        if let Some(value) = lookup("POSTGRES_PORT") {
            self.backup.postgres_port = parse_env("POSTGRES_PORT", &value)?;
        }
        if let Some(value) = lookup("POSTGRES_DB") {
            self.backup.postgres_db = value;
        }
        if let Some(value) = lookup("POSTGRES_USER") {
            self.backup.postgres_user = value;
        }
        if let Some(value) = lookup("POSTGRES_PASSWORD") {
            self.backup.postgres_password = value;
        }
        Ok(())
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config {
                message: "server.port must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(Error::Config {
                message: "rate_limit.requests_per_minute must be greater than zero".to_string(),
            });
        }
        if self.auth.access_token_minutes <= 0 || self.auth.refresh_token_days <= 0 {
            return Err(Error::Config {
                message: "token lifetimes must be positive".to_string(),
            });
        }
        if self.environment == Environment::Production
            && (self.auth.secret_key.len() < 16
                || self.auth.secret_key == AuthSettings::default().secret_key)
        {
            return Err(Error::Config {
                message: "SECRET_KEY must be set to at least 16 characters in production"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Bucket capacity for the global limiter.
    #[must_use]
    pub fn rate_limit_burst(&self) -> u32 {
        self.rate_limit
            .burst
            .unwrap_or(self.rate_limit.requests_per_minute.saturating_mul(2))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::Config {
        message: format!("Invalid value for {key}: {value}"),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Splits a broker URL such as `mqtt://broker:1884` into host and port.
///
/// The scheme is optional and the port defaults to 1883.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let trimmed = url
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://")
        .trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Config {
            message: "MQTT broker URL is empty".to_string(),
        });
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_env("MQTT_BROKER_URL", port)?)),
        None => Ok((trimmed.to_string(), 1883)),
    }
}
