use crate::{
    api::{auth::CurrentUser, error::ServerError, state::AppState},
    core::production::{self, NewProductionOrder, ProductionDashboard, StatusChange},
    entities::{production_event, production_order},
    realtime::envelope,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<NewProductionOrder>,
) -> Result<(StatusCode, Json<production_order::Model>), ServerError> {
    let order = production::create_production_order(&state.db, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn order_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<i64>,
) -> Result<Json<production_order::Model>, ServerError> {
    Ok(Json(production::get_order(&state.db, &user, order_id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<i64>,
    Json(payload): Json<StatusChange>,
) -> Result<Json<production_order::Model>, ServerError> {
    let order = production::update_status(&state.db, &user, order_id, payload).await?;
    state
        .realtime
        .send_to_user(
            order.created_by,
            &envelope(
                "production_status",
                json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                    "status": order.status,
                }),
            ),
        )
        .await;
    Ok(Json(order))
}

pub async fn list_events(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<i64>,
) -> Result<Json<Vec<production_event::Model>>, ServerError> {
    Ok(Json(production::list_events(&state.db, &user, order_id).await?))
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ProductionDashboard>, ServerError> {
    Ok(Json(production::production_dashboard(&state.db, &user).await?))
}
