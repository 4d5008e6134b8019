use crate::{
    api::{auth::CurrentUser, error::ServerError, state::AppState},
    core::alert::{self, AlertFilter, AlertStats},
    entities::alert as alert_entity,
    realtime::envelope,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub notes: Option<String>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Vec<alert_entity::Model>>, ServerError> {
    Ok(Json(alert::list_alerts(&state.db, &filter).await?))
}

pub async fn alert_stats(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<AlertStats>, ServerError> {
    Ok(Json(alert::alert_stats(&state.db).await?))
}

pub async fn alert_detail(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(alert_id): Path<i64>,
) -> Result<Json<alert_entity::Model>, ServerError> {
    Ok(Json(alert::get_alert(&state.db, alert_id).await?))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(alert_id): Path<i64>,
) -> Result<Json<alert_entity::Model>, ServerError> {
    let updated = alert::acknowledge(&state.db, alert_id, user.id).await?;
    notify(&state, &updated).await;
    Ok(Json(updated))
}

pub async fn resolve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(alert_id): Path<i64>,
    payload: Option<Json<ResolveRequest>>,
) -> Result<Json<alert_entity::Model>, ServerError> {
    let notes = payload.and_then(|Json(body)| body.notes);
    let updated = alert::resolve(&state.db, alert_id, user.id, notes).await?;
    notify(&state, &updated).await;
    Ok(Json(updated))
}

pub async fn dismiss(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(alert_id): Path<i64>,
) -> Result<Json<alert_entity::Model>, ServerError> {
    let updated = alert::dismiss(&state.db, alert_id, user.id).await?;
    notify(&state, &updated).await;
    Ok(Json(updated))
}

async fn notify(state: &AppState, updated: &alert_entity::Model) {
    state
        .realtime
        .broadcast(
            &envelope(
                "alert_updated",
                json!({"alert_id": updated.id, "status": updated.status}),
            ),
            None,
        )
        .await;
}
