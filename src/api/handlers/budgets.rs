use crate::{
    api::{auth::CurrentUser, error::ServerError, state::AppState},
    core::budget::{self, BudgetRequest, Component, CostEstimate, Specifications},
    entities::budget as budget_entity,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Body of the stateless estimate endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CalculateRequest {
    #[serde(default)]
    pub specifications: Specifications,
    #[serde(default)]
    pub components: Vec<Component>,
    pub markup_percentage: Option<f64>,
}

pub async fn calculate(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Json(payload): Json<CalculateRequest>,
) -> Result<Json<CostEstimate>, ServerError> {
    let estimate = state.calculator.calculate(
        &payload.specifications,
        &payload.components,
        payload.markup_percentage,
    )?;
    Ok(Json(estimate))
}

pub async fn create_budget(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<BudgetRequest>,
) -> Result<(StatusCode, Json<budget_entity::Model>), ServerError> {
    let created = budget::generate_budget(&state.db, &state.calculator, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn budget_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(budget_id): Path<i64>,
) -> Result<Json<budget_entity::Model>, ServerError> {
    Ok(Json(budget::get_budget(&state.db, &user, budget_id).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(budget_id): Path<i64>,
) -> Result<Json<budget_entity::Model>, ServerError> {
    Ok(Json(budget::approve_budget(&state.db, &user, budget_id).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(budget_id): Path<i64>,
) -> Result<Json<budget_entity::Model>, ServerError> {
    Ok(Json(budget::reject_budget(&state.db, &user, budget_id).await?))
}
