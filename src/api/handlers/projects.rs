use crate::{
    api::{auth::CurrentUser, error::ServerError, state::AppState},
    core::{
        budget,
        project::{self, NewProject, ProjectFilter, ProjectMetrics, ProjectUpdate},
    },
    entities::{budget as budget_entity, project as project_entity},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A project row with its computed metrics.
#[derive(Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: project_entity::Model,
    pub metrics: ProjectMetrics,
}

impl From<project_entity::Model> for ProjectView {
    fn from(project: project_entity::Model) -> Self {
        let metrics = project::metrics(&project, Utc::now());
        Self { project, metrics }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i32,
}

pub async fn list_projects(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<ProjectFilter>,
) -> Result<Json<Vec<ProjectView>>, ServerError> {
    let projects = project::list_projects(&state.db, &user, &filter).await?;
    Ok(Json(projects.into_iter().map(ProjectView::from).collect()))
}

pub async fn create_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<NewProject>,
) -> Result<(StatusCode, Json<ProjectView>), ServerError> {
    let created = project::create_project(&state.db, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn project_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectView>, ServerError> {
    let found = project::get_project(&state.db, &user, project_id).await?;
    Ok(Json(found.into()))
}

pub async fn update_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
    Json(payload): Json<ProjectUpdate>,
) -> Result<Json<ProjectView>, ServerError> {
    let updated = project::update_project(&state.db, &user, project_id, payload).await?;
    Ok(Json(updated.into()))
}

pub async fn delete_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    project::delete_project(&state.db, &user, project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_progress(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Json<ProjectView>, ServerError> {
    let updated = project::update_progress(&state.db, &user, project_id, payload.progress).await?;
    Ok(Json(updated.into()))
}

pub async fn add_team_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, member_id)): Path<(i64, i64)>,
) -> Result<Json<ProjectView>, ServerError> {
    let updated = project::add_team_member(&state.db, &user, project_id, member_id).await?;
    Ok(Json(updated.into()))
}

pub async fn remove_team_member(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((project_id, member_id)): Path<(i64, i64)>,
) -> Result<Json<ProjectView>, ServerError> {
    let updated = project::remove_team_member(&state.db, &user, project_id, member_id).await?;
    Ok(Json(updated.into()))
}

pub async fn list_project_budgets(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<budget_entity::Model>>, ServerError> {
    Ok(Json(
        budget::list_project_budgets(&state.db, &user, project_id).await?,
    ))
}
