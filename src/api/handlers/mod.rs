mod alerts;
mod auth;
mod budgets;
mod devices;
mod health;
mod production;
mod projects;
mod ws;

use axum::Router;
use axum::routing::{get, post};

use crate::api::state::AppState;

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        .route(
            "/auth/api-key",
            post(auth::create_api_key).delete(auth::revoke_api_key),
        )
        .route("/auth/sessions", get(auth::list_sessions))
        .route(
            "/auth/sessions/:session_id",
            axum::routing::delete(auth::revoke_session),
        )
        .route(
            "/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/projects/:project_id",
            get(projects::project_detail)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/projects/:project_id/progress", post(projects::update_progress))
        .route(
            "/projects/:project_id/team/:user_id",
            post(projects::add_team_member).delete(projects::remove_team_member),
        )
        .route("/projects/:project_id/budgets", get(projects::list_project_budgets))
        .route(
            "/devices",
            get(devices::list_devices).post(devices::register_device),
        )
        .route("/devices/stats", get(devices::device_stats))
        .route(
            "/devices/:device_id",
            get(devices::device_detail)
                .patch(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/devices/:device_id/status", post(devices::update_status))
        .route(
            "/devices/:device_id/telemetry",
            get(devices::list_telemetry).post(devices::record_telemetry),
        )
        .route("/devices/:device_id/command", post(devices::send_command))
        .route("/alerts", get(alerts::list_alerts))
        .route("/alerts/stats", get(alerts::alert_stats))
        .route("/alerts/:alert_id", get(alerts::alert_detail))
        .route("/alerts/:alert_id/acknowledge", post(alerts::acknowledge))
        .route("/alerts/:alert_id/resolve", post(alerts::resolve))
        .route("/alerts/:alert_id/dismiss", post(alerts::dismiss))
        .route("/budgets/calculate", post(budgets::calculate))
        .route("/budgets", post(budgets::create_budget))
        .route("/budgets/:budget_id", get(budgets::budget_detail))
        .route("/budgets/:budget_id/approve", post(budgets::approve))
        .route("/budgets/:budget_id/reject", post(budgets::reject))
        .route("/production/orders", post(production::create_order))
        .route("/production/orders/:order_id", get(production::order_detail))
        .route(
            "/production/orders/:order_id/status",
            post(production::update_status),
        )
        .route(
            "/production/orders/:order_id/events",
            get(production::list_events),
        )
        .route("/production/dashboard", get(production::dashboard))
}

/// Health probes and the WebSocket endpoint, mounted at the root.
pub fn root_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/detailed", get(health::detailed))
        .route("/ws", get(ws::upgrade))
}
