//! Liveness, readiness and the aggregated health report.

use crate::{core::string_enum, errors::Result};
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::error;

/// Reported service name.
pub const SERVICE_NAME: &str = "3dPot Backend API";
/// Reported service version.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

string_enum! {
    pub enum HealthStatus {
        Healthy => "healthy",
        Degraded => "degraded",
        Unhealthy => "unhealthy",
    }
}

impl HealthStatus {
    /// The worse of two statuses.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Result of checking one dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentCheck {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Full report returned by the detailed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub checks: BTreeMap<String, ComponentCheck>,
}

/// What the detailed check needs besides the database.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub environment: String,
    pub started_at: DateTime<Utc>,
    /// `None` when the MQTT bridge is disabled
    pub mqtt_connected: Option<bool>,
    /// Connection statistics of the WebSocket manager
    pub websocket: Option<Value>,
}

fn uptime_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = (now - started_at).num_milliseconds().max(0) as f64;
    millis / 1000.0
}

#[must_use]
pub fn liveness(started_at: DateTime<Utc>) -> Liveness {
    let now = Utc::now();
    Liveness {
        status: "alive",
        timestamp: now,
        uptime_seconds: uptime_seconds(started_at, now),
    }
}

/// Runs `SELECT 1`; an error means the service should not receive traffic.
pub async fn readiness(db: &DatabaseConnection) -> Result<Readiness> {
    select_one(db).await?;
    Ok(Readiness {
        status: "ready",
        timestamp: Utc::now(),
    })
}

async fn select_one(db: &DatabaseConnection) -> Result<()> {
    db.execute_unprepared("SELECT 1")
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("readiness check failed: {e}");
            e.into()
        })
}

/// Aggregates every dependency into one report.
///
/// A failing database makes the service unhealthy; a disconnected MQTT bridge
/// only degrades it.
pub async fn detailed(db: &DatabaseConnection, inputs: HealthInputs) -> HealthReport {
    let mut checks = BTreeMap::new();

    let database = match select_one(db).await {
        Ok(()) => ComponentCheck {
            status: HealthStatus::Healthy,
            message: "Database connection".to_string(),
            details: None,
        },
        Err(e) => ComponentCheck {
            status: HealthStatus::Unhealthy,
            message: format!("Database check failed: {e}"),
            details: None,
        },
    };
    checks.insert("database".to_string(), database);

    if let Some(connected) = inputs.mqtt_connected {
        let mqtt = if connected {
            ComponentCheck {
                status: HealthStatus::Healthy,
                message: "MQTT broker connection".to_string(),
                details: None,
            }
        } else {
            ComponentCheck {
                status: HealthStatus::Degraded,
                message: "MQTT broker unavailable".to_string(),
                details: None,
            }
        };
        checks.insert("mqtt".to_string(), mqtt);
    }

    if let Some(stats) = inputs.websocket {
        checks.insert(
            "websocket".to_string(),
            ComponentCheck {
                status: HealthStatus::Healthy,
                message: "WebSocket manager".to_string(),
                details: Some(stats),
            },
        );
    }

    let status = checks
        .values()
        .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));
    let now = Utc::now();
    HealthReport {
        status,
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        environment: inputs.environment,
        timestamp: now,
        uptime_seconds: uptime_seconds(inputs.started_at, now),
        checks,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use chrono::Duration;
    use serde_json::json;

    fn inputs(mqtt_connected: Option<bool>) -> HealthInputs {
        HealthInputs {
            environment: "testing".to_string(),
            started_at: Utc::now() - Duration::seconds(5),
            mqtt_connected,
            websocket: Some(json!({"total_connections": 0})),
        }
    }

    #[test]
    fn test_worst_status() {
        use HealthStatus::{Degraded, Healthy, Unhealthy};
        assert_eq!(Healthy.worst(Healthy), Healthy);
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Unhealthy.worst(Degraded), Unhealthy);
    }

    #[test]
    fn test_liveness_reports_uptime() {
        let live = liveness(Utc::now() - Duration::seconds(3));
        assert_eq!(live.status, "alive");
        assert!(live.uptime_seconds >= 3.0);
    }

    #[tokio::test]
    async fn test_ready_and_healthy() -> Result<()> {
        let db = setup_test_db().await?;
        assert_eq!(readiness(&db).await?.status, "ready");

        let report = detailed(&db, inputs(Some(true))).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.len(), 3);
        assert!(report.uptime_seconds >= 5.0);

        let report = detailed(&db, inputs(None)).await;
        assert!(!report.checks.contains_key("mqtt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_mqtt_down_degrades() -> Result<()> {
        let db = setup_test_db().await?;
        let report = detailed(&db, inputs(Some(false))).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.checks["mqtt"].status, HealthStatus::Degraded);
        Ok(())
    }

    #[tokio::test]
    async fn test_database_failure_is_unhealthy() {
        // Every query on a disconnected handle fails
        let db = DatabaseConnection::Disconnected;
        assert!(readiness(&db).await.is_err());
        let report = detailed(&db, inputs(Some(true))).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }
}
