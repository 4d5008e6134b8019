//! Telemetry business logic - numeric samples reported by devices.

use crate::{
    entities::{DeviceTelemetry, device_telemetry},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{ActiveValue::Set, QueryOrder, QuerySelect, prelude::*};
use serde_json::Value;
use tracing::debug;

/// Samples returned when the caller does not ask for a limit.
pub const DEFAULT_LIMIT: u64 = 100;
/// Upper bound on samples returned in one call.
pub const MAX_LIMIT: u64 = 1000;

/// Stores one sample for `device_id`.
///
/// Works with a plain connection or inside a transaction.
pub async fn record_telemetry<C>(
    db: &C,
    device_id: i64,
    metric: &str,
    value: f64,
    unit: Option<&str>,
    metadata: Option<Value>,
) -> Result<device_telemetry::Model>
where
    C: ConnectionTrait,
{
    if metric.trim().is_empty() {
        return Err(Error::validation("Metric name cannot be empty"));
    }
    if !value.is_finite() {
        return Err(Error::validation(format!(
            "Telemetry value for {metric} must be finite"
        )));
    }

    let sample = device_telemetry::ActiveModel {
        device_id: Set(device_id),
        metric: Set(metric.trim().to_string()),
        value: Set(value),
        unit: Set(unit.map(ToString::to_string)),
        metadata: Set(metadata),
        recorded_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    debug!(device_id, metric, value, "telemetry recorded");
    Ok(sample)
}

/// Most recent samples of a device, newest first, optionally for one metric.
pub async fn latest_telemetry(
    db: &DatabaseConnection,
    device_id: i64,
    metric: Option<&str>,
    limit: Option<u64>,
) -> Result<Vec<device_telemetry::Model>> {
    let mut query =
        DeviceTelemetry::find().filter(device_telemetry::Column::DeviceId.eq(device_id));
    if let Some(metric) = metric {
        query = query.filter(device_telemetry::Column::Metric.eq(metric));
    }
    query
        .order_by_desc(device_telemetry::Column::RecordedAt)
        .order_by_desc(device_telemetry::Column::Id)
        .limit(limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT))
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::device::create_esp32_monitor;
    use crate::test_utils::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let result = record_telemetry(&db, 1, "", 1.0, None, None).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        let result = record_telemetry(&db, 1, "weight_g", f64::NAN, None, None).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() -> Result<()> {
        let db = setup_test_db().await?;
        let scale = create_esp32_monitor(&db, None, "ESP-001", "Scale", None).await?;
        for grams in [900.0, 850.0, 800.0] {
            record_telemetry(&db, scale.id, "weight_g", grams, Some("g"), None).await?;
        }
        record_telemetry(
            &db,
            scale.id,
            "percentage",
            80.0,
            Some("%"),
            Some(json!({"source": "test"})),
        )
        .await?;

        let all = latest_telemetry(&db, scale.id, None, None).await?;
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].metric, "percentage");

        let weights = latest_telemetry(&db, scale.id, Some("weight_g"), Some(2)).await?;
        let values: Vec<f64> = weights.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![800.0, 850.0]);
        Ok(())
    }
}
