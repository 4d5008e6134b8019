//! Alert business logic.
//!
//! Alerts are raised from telemetry thresholds and device events. An alert that
//! is still open (active or acknowledged) for the same device and type is not
//! duplicated; its `recurrence_count` is bumped instead.

use crate::{
    config::settings::AlertThresholds,
    core::string_enum,
    entities::{Alert, alert},
    errors::{Error, Result},
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveValue::Set, QueryOrder, QuerySelect, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

string_enum! {
    pub enum AlertSeverity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    pub enum AlertStatus {
        Active => "active",
        Acknowledged => "acknowledged",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
}

string_enum! {
    pub enum AlertType {
        WeightLow => "weight_low",
        BatteryLow => "battery_low",
        DeviceOffline => "device_offline",
        DeviceError => "device_error",
        TemperatureHigh => "temperature_high",
        HumidityHigh => "humidity_high",
        VibrationHigh => "vibration_high",
        QualityFailure => "quality_failure",
        MaintenanceDue => "maintenance_due",
        Custom => "custom",
    }
}

impl AlertStatus {
    /// Resolved and dismissed alerts never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }
}

/// Input for [`raise_alert`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub device_id: Option<i64>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: Option<String>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
}

/// List filter and pagination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub device_id: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AlertStats {
    pub total: u64,
    pub active: u64,
    pub critical_active: u64,
    pub last_24h: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

/// Alert suggested by a threshold check, before it is tied to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub threshold: f64,
    pub value: f64,
}

impl ThresholdBreach {
    #[must_use]
    pub fn into_alert(self, device_id: Option<i64>, description: Option<String>) -> NewAlert {
        NewAlert {
            device_id,
            alert_type: self.alert_type,
            severity: self.severity,
            title: self.title,
            description,
            threshold_value: Some(self.threshold),
            actual_value: Some(self.value),
        }
    }
}

/// Checks one metric against the configured limits.
///
/// Known metrics are `temperature`, `humidity`, `vibration`, `percentage`
/// (filament left on the spool) and `battery_level`.
#[must_use]
pub fn evaluate_thresholds(
    thresholds: &AlertThresholds,
    metric: &str,
    value: f64,
) -> Option<ThresholdBreach> {
    let (alert_type, severity, title, threshold) = match metric {
        "temperature" if value > thresholds.temperature_high => {
            let severity = if value > thresholds.temperature_high + 10.0 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            (
                AlertType::TemperatureHigh,
                severity,
                "Temperature above limit",
                thresholds.temperature_high,
            )
        }
        "humidity" if value > thresholds.humidity_high => (
            AlertType::HumidityHigh,
            AlertSeverity::Medium,
            "Humidity above limit",
            thresholds.humidity_high,
        ),
        "vibration" if value > thresholds.vibration_high => (
            AlertType::VibrationHigh,
            AlertSeverity::Medium,
            "Vibration above limit",
            thresholds.vibration_high,
        ),
        "percentage" if value < thresholds.filament_low_percentage => {
            let severity = if value < thresholds.filament_low_percentage / 2.0 {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            (
                AlertType::WeightLow,
                severity,
                "Filament running low",
                thresholds.filament_low_percentage,
            )
        }
        "battery_level" if value < thresholds.battery_low => (
            AlertType::BatteryLow,
            AlertSeverity::Medium,
            "Battery low",
            thresholds.battery_low,
        ),
        _ => return None,
    };
    Some(ThresholdBreach {
        alert_type,
        severity,
        title: title.to_string(),
        threshold,
        value,
    })
}

/// Creates an alert, or bumps the recurrence of the matching open one.
///
/// Returns the alert and whether a new row was inserted.
pub async fn raise_alert<C>(db: &C, new_alert: NewAlert) -> Result<(alert::Model, bool)>
where
    C: ConnectionTrait,
{
    if new_alert.title.trim().is_empty() {
        return Err(Error::validation("Alert title cannot be empty"));
    }
    let now = Utc::now();

    let mut open = Alert::find()
        .filter(alert::Column::AlertType.eq(new_alert.alert_type.as_str()))
        .filter(alert::Column::Status.is_in([
            AlertStatus::Active.as_str(),
            AlertStatus::Acknowledged.as_str(),
        ]));
    open = match new_alert.device_id {
        Some(device_id) => open.filter(alert::Column::DeviceId.eq(device_id)),
        None => open.filter(alert::Column::DeviceId.is_null()),
    };

    if let Some(existing) = open.one(db).await? {
        Alert::update_many()
            .col_expr(
                alert::Column::RecurrenceCount,
                Expr::col(alert::Column::RecurrenceCount).add(1),
            )
            .col_expr(alert::Column::ActualValue, Expr::value(new_alert.actual_value))
            .col_expr(alert::Column::UpdatedAt, Expr::value(now))
            .filter(alert::Column::Id.eq(existing.id))
            .exec(db)
            .await?;
        let updated = Alert::find_by_id(existing.id)
            .one(db)
            .await?
            .ok_or_else(|| Error::not_found("alert", existing.id))?;
        return Ok((updated, false));
    }

    let created = alert::ActiveModel {
        device_id: Set(new_alert.device_id),
        alert_type: Set(new_alert.alert_type.as_str().to_string()),
        severity: Set(new_alert.severity.as_str().to_string()),
        status: Set(AlertStatus::Active.as_str().to_string()),
        title: Set(new_alert.title.trim().to_string()),
        description: Set(new_alert.description),
        threshold_value: Set(new_alert.threshold_value),
        actual_value: Set(new_alert.actual_value),
        recurrence_count: Set(1),
        acknowledged_by: Set(None),
        acknowledged_at: Set(None),
        resolved_by: Set(None),
        resolved_at: Set(None),
        resolution_notes: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    warn!(
        alert_id = created.id,
        alert_type = %created.alert_type,
        severity = %created.severity,
        device_id = ?created.device_id,
        "alert raised"
    );
    Ok((created, true))
}

pub async fn get_alert(db: &DatabaseConnection, alert_id: i64) -> Result<alert::Model> {
    Alert::find_by_id(alert_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("alert", alert_id))
}

/// Alerts matching `filter`, newest first.
pub async fn list_alerts(db: &DatabaseConnection, filter: &AlertFilter) -> Result<Vec<alert::Model>> {
    let mut query = Alert::find();
    if filter.active_only {
        query = query.filter(alert::Column::Status.eq(AlertStatus::Active.as_str()));
    } else if let Some(status) = filter.status {
        query = query.filter(alert::Column::Status.eq(status.as_str()));
    }
    if let Some(severity) = filter.severity {
        query = query.filter(alert::Column::Severity.eq(severity.as_str()));
    }
    if let Some(device_id) = filter.device_id {
        query = query.filter(alert::Column::DeviceId.eq(device_id));
    }
    query
        .order_by_desc(alert::Column::CreatedAt)
        .order_by_desc(alert::Column::Id)
        .offset(filter.skip.unwrap_or(0))
        .limit(filter.limit.unwrap_or(100).min(1000))
        .all(db)
        .await
        .map_err(Into::into)
}

fn transition(
    model: &alert::Model,
    allowed_from: &[AlertStatus],
    to: AlertStatus,
) -> Result<()> {
    let current: AlertStatus = model.status.parse()?;
    if allowed_from.contains(&current) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: current.to_string(),
            to: to.to_string(),
        })
    }
}

/// Marks an active alert as seen by `user_id`.
pub async fn acknowledge(db: &DatabaseConnection, alert_id: i64, user_id: i64) -> Result<alert::Model> {
    let model = get_alert(db, alert_id).await?;
    transition(&model, &[AlertStatus::Active], AlertStatus::Acknowledged)?;
    let now = Utc::now();
    let mut active: alert::ActiveModel = model.into();
    active.status = Set(AlertStatus::Acknowledged.as_str().to_string());
    active.acknowledged_by = Set(Some(user_id));
    active.acknowledged_at = Set(Some(now));
    active.updated_at = Set(now);
    let updated = active.update(db).await?;
    info!(alert_id, user_id, "alert acknowledged");
    Ok(updated)
}

/// Closes an open alert with optional notes.
pub async fn resolve(
    db: &DatabaseConnection,
    alert_id: i64,
    user_id: i64,
    notes: Option<String>,
) -> Result<alert::Model> {
    let model = get_alert(db, alert_id).await?;
    transition(
        &model,
        &[AlertStatus::Active, AlertStatus::Acknowledged],
        AlertStatus::Resolved,
    )?;
    let now = Utc::now();
    let mut active: alert::ActiveModel = model.into();
    active.status = Set(AlertStatus::Resolved.as_str().to_string());
    active.resolved_by = Set(Some(user_id));
    active.resolved_at = Set(Some(now));
    active.resolution_notes = Set(notes);
    active.updated_at = Set(now);
    let updated = active.update(db).await?;
    info!(alert_id, user_id, "alert resolved");
    Ok(updated)
}

pub async fn dismiss(db: &DatabaseConnection, alert_id: i64, user_id: i64) -> Result<alert::Model> {
    let model = get_alert(db, alert_id).await?;
    transition(
        &model,
        &[AlertStatus::Active, AlertStatus::Acknowledged],
        AlertStatus::Dismissed,
    )?;
    let now = Utc::now();
    let mut active: alert::ActiveModel = model.into();
    active.status = Set(AlertStatus::Dismissed.as_str().to_string());
    active.resolved_by = Set(Some(user_id));
    active.resolved_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await.map_err(Into::into)
}

/// Counts over every alert.
pub async fn alert_stats(db: &DatabaseConnection) -> Result<AlertStats> {
    let since = Utc::now() - Duration::hours(24);
    let alerts = Alert::find().all(db).await?;

    let mut stats = AlertStats::default();
    for model in &alerts {
        stats.total += 1;
        let is_active = model.status == AlertStatus::Active.as_str();
        if is_active {
            stats.active += 1;
            if model.severity == AlertSeverity::Critical.as_str() {
                stats.critical_active += 1;
            }
        }
        if model.created_at >= since {
            stats.last_24h += 1;
        }
        *stats.by_severity.entry(model.severity.clone()).or_default() += 1;
        *stats.by_status.entry(model.status.clone()).or_default() += 1;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    fn temperature_alert(device_id: Option<i64>, value: f64) -> NewAlert {
        evaluate_thresholds(&AlertThresholds::default(), "temperature", value)
            .unwrap()
            .into_alert(device_id, None)
    }

    #[test]
    fn test_evaluate_thresholds() {
        let limits = AlertThresholds::default();
        assert!(evaluate_thresholds(&limits, "temperature", 65.0).is_none());

        let hot = evaluate_thresholds(&limits, "temperature", 75.0).unwrap();
        assert_eq!(hot.alert_type, AlertType::TemperatureHigh);
        assert_eq!(hot.severity, AlertSeverity::High);
        let very_hot = evaluate_thresholds(&limits, "temperature", 85.0).unwrap();
        assert_eq!(very_hot.severity, AlertSeverity::Critical);

        let low = evaluate_thresholds(&limits, "percentage", 15.0).unwrap();
        assert_eq!(low.alert_type, AlertType::WeightLow);
        assert_eq!(low.severity, AlertSeverity::Medium);
        let empty = evaluate_thresholds(&limits, "percentage", 5.0).unwrap();
        assert_eq!(empty.severity, AlertSeverity::High);

        assert!(evaluate_thresholds(&limits, "battery_level", 10.0).is_some());
        assert!(evaluate_thresholds(&limits, "humidity", 81.0).is_some());
        assert!(evaluate_thresholds(&limits, "rpm", 1e9).is_none());
    }

    #[tokio::test]
    async fn test_raise_deduplicates_open_alerts() -> Result<()> {
        let db = setup_test_db().await?;
        let device = create_test_device(&db, "ESP-001").await?;

        let (first, created) = raise_alert(&db, temperature_alert(Some(device.id), 75.0)).await?;
        assert!(created);
        assert_eq!(first.recurrence_count, 1);

        let (again, created) = raise_alert(&db, temperature_alert(Some(device.id), 78.0)).await?;
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(again.recurrence_count, 2);
        assert_eq!(again.actual_value, Some(78.0));

        // A different device gets its own alert
        let other = create_test_device(&db, "ESP-002").await?;
        let (_, created) = raise_alert(&db, temperature_alert(Some(other.id), 75.0)).await?;
        assert!(created);

        // Once resolved, a new breach opens a new alert
        resolve(&db, first.id, 1, Some("fan replaced".to_string())).await?;
        let (fresh, created) = raise_alert(&db, temperature_alert(Some(device.id), 79.0)).await?;
        assert!(created);
        assert_ne!(fresh.id, first.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() -> Result<()> {
        let db = setup_test_db().await?;
        let (alert, _) = raise_alert(&db, temperature_alert(None, 75.0)).await?;

        let acked = acknowledge(&db, alert.id, 7).await?;
        assert_eq!(acked.status, "acknowledged");
        assert_eq!(acked.acknowledged_by, Some(7));

        let again = acknowledge(&db, alert.id, 7).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));

        let resolved = resolve(&db, alert.id, 7, Some("cooled down".to_string())).await?;
        assert_eq!(resolved.status, "resolved");
        assert_eq!(resolved.resolution_notes.as_deref(), Some("cooled down"));

        let dismissed = dismiss(&db, alert.id, 7).await;
        assert!(matches!(dismissed, Err(Error::InvalidTransition { .. })));

        let missing = acknowledge(&db, 999, 7).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_stats() -> Result<()> {
        let db = setup_test_db().await?;
        let device = create_test_device(&db, "ESP-001").await?;
        let (hot, _) = raise_alert(&db, temperature_alert(Some(device.id), 85.0)).await?;
        raise_alert(
            &db,
            NewAlert {
                device_id: Some(device.id),
                alert_type: AlertType::BatteryLow,
                severity: AlertSeverity::Low,
                title: "Battery low".to_string(),
                description: None,
                threshold_value: Some(20.0),
                actual_value: Some(18.0),
            },
        )
        .await?;
        let (offline, _) = raise_alert(
            &db,
            NewAlert {
                device_id: None,
                alert_type: AlertType::DeviceOffline,
                severity: AlertSeverity::Medium,
                title: "Gateway offline".to_string(),
                description: None,
                threshold_value: None,
                actual_value: None,
            },
        )
        .await?;
        dismiss(&db, offline.id, 1).await?;

        let active = list_alerts(
            &db,
            &AlertFilter {
                active_only: true,
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(active.len(), 2);

        let critical = list_alerts(
            &db,
            &AlertFilter {
                severity: Some(AlertSeverity::Critical),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].id, hot.id);

        let stats = alert_stats(&db).await?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.critical_active, 1);
        assert_eq!(stats.last_24h, 3);
        assert_eq!(stats.by_status.get("dismissed"), Some(&1));
        Ok(())
    }
}
