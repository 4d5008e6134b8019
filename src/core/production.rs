//! Production business logic - orders created from approved budgets.
//!
//! Every order keeps an append-only event history. Delivered and cancelled
//! orders are final.

use crate::{
    core::{budget::BudgetStatus, project, round2, string_enum},
    entities::{Budget, ProductionEvent, ProductionOrder, production_event, production_order, user},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{ActiveValue::Set, QueryOrder, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, instrument};

string_enum! {
    pub enum ProductionStatus {
        Planning => "planning",
        Scheduled => "scheduled",
        InProgress => "in_progress",
        QualityCheck => "quality_check",
        Completed => "completed",
        Delivered => "delivered",
        Cancelled => "cancelled",
        OnHold => "on_hold",
    }
}

impl ProductionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

string_enum! {
    /// Batch size class, derived from the ordered quantity.
    pub enum ProductionType {
        Prototype => "prototype",
        BatchSmall => "batch_small",
        BatchMedium => "batch_medium",
        BatchLarge => "batch_large",
    }
}

string_enum! {
    pub enum OrderPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

const SETUP_HOURS: f64 = 0.5;
const CYCLE_HOURS: f64 = 2.0;
const LABOR_BUFFER: f64 = 1.1;

impl ProductionType {
    #[must_use]
    pub const fn for_quantity(quantity: u32) -> Self {
        match quantity {
            0 | 1 => Self::Prototype,
            2..=10 => Self::BatchSmall,
            11..=100 => Self::BatchMedium,
            _ => Self::BatchLarge,
        }
    }

    /// Labor multiplier; prototypes need the most hand work per unit.
    #[must_use]
    pub const fn labor_multiplier(self) -> f64 {
        match self {
            Self::Prototype => 1.5,
            Self::BatchSmall => 1.0,
            Self::BatchMedium => 0.9,
            Self::BatchLarge => 0.8,
        }
    }

    #[must_use]
    pub fn required_equipment(self) -> Vec<&'static str> {
        match self {
            Self::Prototype => vec!["3d_printer", "post_processing_station"],
            Self::BatchSmall => vec!["3d_printer", "post_processing_station", "quality_station"],
            Self::BatchMedium => vec![
                "3d_printer_farm",
                "post_processing_station",
                "quality_station",
                "packaging_station",
            ],
            Self::BatchLarge => vec![
                "3d_printer_farm",
                "automated_post_processing",
                "conveyor",
                "quality_station",
                "packaging_station",
            ],
        }
    }
}

/// Estimated labor hours for `quantity` units.
#[must_use]
pub fn estimate_labor_hours(quantity: u32) -> f64 {
    let kind = ProductionType::for_quantity(quantity);
    round2((SETUP_HOURS + CYCLE_HOURS * f64::from(quantity)) * kind.labor_multiplier() * LABOR_BUFFER)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProductionOrder {
    pub budget_id: i64,
    pub quantity: u32,
    pub priority: Option<OrderPriority>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: ProductionStatus,
    pub actual_cost: Option<f64>,
    pub notes: Option<String>,
}

/// Order counters for one user's projects, or everything for admins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductionDashboard {
    pub total_orders: u64,
    pub by_status: BTreeMap<String, u64>,
    pub completed: u64,
    pub in_progress: u64,
    pub pending: u64,
    pub total_estimated_cost: f64,
    /// Mean hours from creation to completion
    pub average_lead_time_hours: Option<f64>,
}

async fn record_event<C: ConnectionTrait>(
    db: &C,
    order_id: i64,
    event_type: &str,
    old_status: Option<ProductionStatus>,
    new_status: ProductionStatus,
    description: String,
    user_id: i64,
) -> Result<production_event::Model> {
    production_event::ActiveModel {
        order_id: Set(order_id),
        event_type: Set(event_type.to_string()),
        old_status: Set(old_status.map(|s| s.as_str().to_string())),
        new_status: Set(Some(new_status.as_str().to_string())),
        description: Set(description),
        created_by: Set(Some(user_id)),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Opens a production order for an approved budget.
#[instrument(skip(db, author, new_order), fields(budget_id = new_order.budget_id))]
pub async fn create_production_order(
    db: &DatabaseConnection,
    author: &user::Model,
    new_order: NewProductionOrder,
) -> Result<production_order::Model> {
    if new_order.quantity == 0 {
        return Err(Error::validation("Quantity must be at least 1"));
    }
    let quantity = i32::try_from(new_order.quantity)
        .map_err(|_| Error::validation("Quantity is too large"))?;

    let budget = Budget::find_by_id(new_order.budget_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("budget", new_order.budget_id))?;
    project::get_editable_project(db, author, budget.project_id).await?;
    if budget.status != BudgetStatus::Approved.as_str() {
        return Err(Error::Conflict {
            message: format!(
                "Budget {} is {}, only approved budgets can be produced",
                budget.id, budget.status
            ),
        });
    }

    let kind = ProductionType::for_quantity(new_order.quantity);
    let now = Utc::now();
    let txn = db.begin().await?;

    let order = production_order::ActiveModel {
        // Replaced with the id-based number once the row exists
        order_number: Set(format!("PO-PENDING-{}", uuid::Uuid::new_v4())),
        budget_id: Set(budget.id),
        project_id: Set(budget.project_id),
        created_by: Set(author.id),
        quantity: Set(quantity),
        production_type: Set(kind.as_str().to_string()),
        status: Set(ProductionStatus::Planning.as_str().to_string()),
        priority: Set(new_order
            .priority
            .unwrap_or(OrderPriority::Normal)
            .as_str()
            .to_string()),
        estimated_cost: Set(round2(budget.final_price * f64::from(new_order.quantity))),
        actual_cost: Set(None),
        cost_variance: Set(None),
        estimated_labor_hours: Set(estimate_labor_hours(new_order.quantity)),
        required_equipment: Set(json!(kind.required_equipment())),
        actual_start: Set(None),
        actual_end: Set(None),
        completed_at: Set(None),
        notes: Set(new_order.notes),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let id = order.id;
    let mut numbered: production_order::ActiveModel = order.into();
    numbered.order_number = Set(format!("PO-{}-{id:06}", now.format("%Y%m%d")));
    let order = numbered.update(&txn).await?;

    record_event(
        &txn,
        order.id,
        "created",
        None,
        ProductionStatus::Planning,
        format!("Order created for {} unit(s)", order.quantity),
        author.id,
    )
    .await?;
    txn.commit().await?;

    info!(
        order_id = order.id,
        order_number = %order.order_number,
        production_type = %kind,
        "production order created"
    );
    Ok(order)
}

/// Loads an order whose project the viewer can see.
pub async fn get_order(
    db: &DatabaseConnection,
    viewer: &user::Model,
    order_id: i64,
) -> Result<production_order::Model> {
    let order = ProductionOrder::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("production order", order_id))?;
    project::get_project(db, viewer, order.project_id).await?;
    Ok(order)
}

/// Moves an order to a new status and records the change.
pub async fn update_status(
    db: &DatabaseConnection,
    author: &user::Model,
    order_id: i64,
    change: StatusChange,
) -> Result<production_order::Model> {
    let order = get_order(db, author, order_id).await?;
    project::get_editable_project(db, author, order.project_id).await?;

    let current: ProductionStatus = order.status.parse()?;
    if current.is_terminal() || current == change.status {
        return Err(Error::InvalidTransition {
            from: current.to_string(),
            to: change.status.to_string(),
        });
    }
    if let Some(cost) = change.actual_cost {
        if !cost.is_finite() || cost < 0.0 {
            return Err(Error::validation("Actual cost cannot be negative"));
        }
    }

    let now = Utc::now();
    let mut active: production_order::ActiveModel = order.clone().into();
    if let Some(cost) = change.actual_cost {
        active.actual_cost = Set(Some(round2(cost)));
    }
    match change.status {
        ProductionStatus::InProgress if order.actual_start.is_none() => {
            active.actual_start = Set(Some(now));
        }
        ProductionStatus::Completed => {
            active.actual_end = Set(Some(now));
            active.completed_at = Set(Some(now));
            let actual = change.actual_cost.or(order.actual_cost);
            active.cost_variance = Set(actual.map(|a| round2(a - order.estimated_cost)));
        }
        _ => {}
    }
    if let Some(notes) = &change.notes {
        active.notes = Set(Some(notes.clone()));
    }
    active.status = Set(change.status.as_str().to_string());
    active.updated_at = Set(now);

    let txn = db.begin().await?;
    let updated = active.update(&txn).await?;
    record_event(
        &txn,
        order_id,
        "status_change",
        Some(current),
        change.status,
        change
            .notes
            .unwrap_or_else(|| format!("Status changed from {current} to {}", change.status)),
        author.id,
    )
    .await?;
    txn.commit().await?;

    info!(order_id, from = %current, to = %change.status, "production status changed");
    Ok(updated)
}

/// Event history of an order, oldest first.
pub async fn list_events(
    db: &DatabaseConnection,
    viewer: &user::Model,
    order_id: i64,
) -> Result<Vec<production_event::Model>> {
    get_order(db, viewer, order_id).await?;
    ProductionEvent::find()
        .filter(production_event::Column::OrderId.eq(order_id))
        .order_by_asc(production_event::Column::CreatedAt)
        .order_by_asc(production_event::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Aggregates orders created by `viewer` (every order for admins).
pub async fn production_dashboard(
    db: &DatabaseConnection,
    viewer: &user::Model,
) -> Result<ProductionDashboard> {
    let mut query = ProductionOrder::find();
    if !viewer.is_admin() {
        query = query.filter(production_order::Column::CreatedBy.eq(viewer.id));
    }
    let orders = query.all(db).await?;

    let mut dashboard = ProductionDashboard {
        total_orders: orders.len() as u64,
        ..Default::default()
    };
    let mut lead_times = Vec::new();
    for order in &orders {
        *dashboard.by_status.entry(order.status.clone()).or_insert(0) += 1;
        dashboard.total_estimated_cost += order.estimated_cost;
        match order.status.parse::<ProductionStatus>() {
            Ok(ProductionStatus::Completed | ProductionStatus::Delivered) => {
                dashboard.completed += 1;
            }
            Ok(ProductionStatus::InProgress | ProductionStatus::QualityCheck) => {
                dashboard.in_progress += 1;
            }
            Ok(ProductionStatus::Planning | ProductionStatus::Scheduled) => dashboard.pending += 1,
            _ => {}
        }
        if let Some(done) = order.completed_at {
            lead_times.push((done - order.created_at).num_seconds() as f64 / 3600.0);
        }
    }
    dashboard.total_estimated_cost = round2(dashboard.total_estimated_cost);
    if !lead_times.is_empty() {
        dashboard.average_lead_time_hours =
            Some(round2(lead_times.iter().sum::<f64>() / lead_times.len() as f64));
    }
    Ok(dashboard)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::budget::approve_budget;
    use crate::test_utils::*;

    #[test]
    fn test_type_and_labor_by_quantity() {
        assert_eq!(ProductionType::for_quantity(1), ProductionType::Prototype);
        assert_eq!(ProductionType::for_quantity(2), ProductionType::BatchSmall);
        assert_eq!(ProductionType::for_quantity(10), ProductionType::BatchSmall);
        assert_eq!(ProductionType::for_quantity(11), ProductionType::BatchMedium);
        assert_eq!(ProductionType::for_quantity(100), ProductionType::BatchMedium);
        assert_eq!(ProductionType::for_quantity(101), ProductionType::BatchLarge);

        // (0.5 + 2.0) * 1.5 * 1.1
        assert!((estimate_labor_hours(1) - 4.13).abs() < 0.006);
        // (0.5 + 20.0) * 1.0 * 1.1
        assert_eq!(estimate_labor_hours(10), 22.55);
        assert!(ProductionType::BatchLarge.required_equipment().contains(&"conveyor"));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_production_order(
            &db,
            &sample_user(1),
            NewProductionOrder {
                budget_id: 1,
                quantity: 0,
                priority: None,
                notes: None,
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_order_requires_approved_budget() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "maker").await?;
        let project = create_test_project(&db, &owner, "Gearbox").await?;
        let budget = create_test_budget(&db, &owner, project.id).await?;

        let draft = NewProductionOrder {
            budget_id: budget.id,
            quantity: 5,
            priority: None,
            notes: None,
        };
        let result = create_production_order(&db, &owner, draft.clone()).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));

        approve_budget(&db, &owner, budget.id).await?;
        let order = create_production_order(&db, &owner, draft).await?;
        assert_eq!(order.production_type, "batch_small");
        assert_eq!(order.status, "planning");
        assert_eq!(order.priority, "normal");
        assert_eq!(order.estimated_cost, round2(budget.final_price * 5.0));
        assert!(order.order_number.starts_with("PO-"));
        assert!(order.order_number.ends_with(&format!("{:06}", order.id)));

        let events = list_events(&db, &owner, order.id).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "created");
        Ok(())
    }

    #[tokio::test]
    async fn test_status_lifecycle() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "maker").await?;
        let order = create_test_order(&db, &owner, 1).await?;

        let change = |status, actual_cost| StatusChange {
            status,
            actual_cost,
            notes: None,
        };
        let started =
            update_status(&db, &owner, order.id, change(ProductionStatus::InProgress, None)).await?;
        let first_start = started.actual_start.unwrap();
        update_status(&db, &owner, order.id, change(ProductionStatus::OnHold, None)).await?;
        let resumed =
            update_status(&db, &owner, order.id, change(ProductionStatus::InProgress, None)).await?;
        assert_eq!(resumed.actual_start, Some(first_start));

        let actual = order.estimated_cost + 12.5;
        let done = update_status(
            &db,
            &owner,
            order.id,
            change(ProductionStatus::Completed, Some(actual)),
        )
        .await?;
        assert!(done.completed_at.is_some());
        assert!(done.actual_end.is_some());
        assert_eq!(done.cost_variance, Some(12.5));

        update_status(&db, &owner, order.id, change(ProductionStatus::Delivered, None)).await?;
        let result =
            update_status(&db, &owner, order.id, change(ProductionStatus::Planning, None)).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let events = list_events(&db, &owner, order.id).await?;
        assert_eq!(events.len(), 6);
        assert_eq!(events[5].old_status.as_deref(), Some("completed"));
        assert_eq!(events[5].new_status.as_deref(), Some("delivered"));
        Ok(())
    }

    #[tokio::test]
    async fn test_dashboard_counts() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "maker").await?;
        let first = create_test_order(&db, &owner, 1).await?;
        let second = create_test_order(&db, &owner, 20).await?;
        update_status(
            &db,
            &owner,
            second.id,
            StatusChange {
                status: ProductionStatus::Completed,
                actual_cost: Some(10.0),
                notes: None,
            },
        )
        .await?;

        let dashboard = production_dashboard(&db, &owner).await?;
        assert_eq!(dashboard.total_orders, 2);
        assert_eq!(dashboard.completed, 1);
        assert_eq!(dashboard.pending, 1);
        assert_eq!(dashboard.by_status.get("planning"), Some(&1));
        assert_eq!(
            dashboard.total_estimated_cost,
            round2(first.estimated_cost + second.estimated_cost)
        );
        assert!(dashboard.average_lead_time_hours.is_some());

        let other = create_test_user(&db, "other").await?;
        assert_eq!(production_dashboard(&db, &other).await?.total_orders, 0);
        Ok(())
    }
}
