//! Project business logic - CRUD, progress tracking and derived metrics.
//!
//! Projects are visible to their owner, their team members, admins, and (when
//! `is_public`) every authenticated user. Only the owner or an admin may change
//! them. Deletion is soft.

use crate::{
    core::string_enum,
    entities::{Project, User, project, user},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, QueryOrder, QuerySelect, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

string_enum! {
    /// Lifecycle of a project.
    pub enum ProjectStatus {
        Draft => "draft",
        Planning => "planning",
        InProgress => "in_progress",
        Testing => "testing",
        Completed => "completed",
        OnHold => "on_hold",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum ProjectPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    pub enum ProjectType {
        Prototype => "prototype",
        Production => "production",
        Research => "research",
        Education => "education",
        Commercial => "commercial",
    }
}

const MAX_NAME_LENGTH: usize = 200;
const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 500;

/// Creation payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub project_type: Option<ProjectType>,
    pub priority: Option<ProjectPriority>,
    #[serde(default)]
    pub is_public: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub material: Option<String>,
    pub filament_weight_start: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_type: Option<ProjectType>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    pub is_public: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub material: Option<String>,
    pub filament_weight_start: Option<f64>,
    pub filament_weight_end: Option<f64>,
    pub filament_cost: Option<f64>,
    pub tags: Option<Vec<String>>,
}

/// List filter and pagination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

/// Values computed from a project row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectMetrics {
    pub is_active: bool,
    pub is_overdue: bool,
    pub days_remaining: Option<i64>,
    pub filament_used: Option<f64>,
    pub filament_cost_per_gram: Option<f64>,
    pub efficiency: Option<f64>,
}

/// Computes the derived metrics of `model` as of `now`.
#[must_use]
pub fn metrics(model: &project::Model, now: DateTime<Utc>) -> ProjectMetrics {
    let filament_used = match (model.filament_weight_start, model.filament_weight_end) {
        (Some(start), Some(end)) => Some((start - end).max(0.0)),
        _ => None,
    };
    let filament_cost_per_gram = match (filament_used, model.filament_cost) {
        (Some(used), Some(cost)) if used > 0.0 => Some(cost / used),
        _ => None,
    };
    let efficiency = match (model.estimated_hours, model.actual_hours) {
        (Some(estimated), Some(actual)) if actual > 0.0 => {
            Some((estimated / actual * 100.0).min(100.0))
        }
        _ => None,
    };

    ProjectMetrics {
        is_active: matches!(
            model.status.as_str(),
            "planning" | "in_progress" | "testing"
        ),
        is_overdue: model.due_date.is_some_and(|due| now > due),
        days_remaining: model
            .due_date
            .map(|due| (due - now).num_days().max(0)),
        filament_used,
        filament_cost_per_gram,
        efficiency,
    }
}

/// Clamps `progress` to 0..=100 and returns the status it implies.
#[must_use]
pub fn apply_progress(current: ProjectStatus, progress: i32) -> (i32, ProjectStatus) {
    let progress = progress.clamp(0, 100);
    let status = if progress == 100 {
        ProjectStatus::Completed
    } else if progress > 0 && current == ProjectStatus::Draft {
        ProjectStatus::InProgress
    } else {
        current
    };
    (progress, status)
}

/// Team member ids stored on the project.
#[must_use]
pub fn team_members(model: &project::Model) -> Vec<i64> {
    serde_json::from_value(model.team_members.clone()).unwrap_or_default()
}

#[must_use]
pub fn tags(model: &project::Model) -> Vec<String> {
    serde_json::from_value(model.tags.clone()).unwrap_or_default()
}

fn can_view(viewer: &user::Model, model: &project::Model) -> bool {
    model.is_public
        || viewer.is_admin()
        || model.owner_id == viewer.id
        || team_members(model).contains(&viewer.id)
}

fn can_edit(viewer: &user::Model, model: &project::Model) -> bool {
    viewer.is_admin() || model.owner_id == viewer.id
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Project name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(format!(
            "Project name cannot exceed {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_non_negative(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(Error::validation(format!(
            "{field} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

fn validate_dates(start: Option<DateTime<Utc>>, due: Option<DateTime<Utc>>) -> Result<()> {
    match (start, due) {
        (Some(start), Some(due)) if due < start => Err(Error::validation(
            "Due date cannot be before the start date",
        )),
        _ => Ok(()),
    }
}

/// Creates a draft project owned by `owner`.
pub async fn create_project(
    db: &DatabaseConnection,
    owner: &user::Model,
    new_project: NewProject,
) -> Result<project::Model> {
    let name = validate_name(&new_project.name)?;
    validate_non_negative("estimated_hours", new_project.estimated_hours)?;
    validate_non_negative("filament_weight_start", new_project.filament_weight_start)?;
    validate_dates(new_project.start_date, new_project.due_date)?;

    let now = Utc::now();
    let project = project::ActiveModel {
        owner_id: Set(owner.id),
        name: Set(name),
        description: Set(new_project.description),
        project_type: Set(new_project
            .project_type
            .unwrap_or(ProjectType::Prototype)
            .as_str()
            .to_string()),
        status: Set(ProjectStatus::Draft.as_str().to_string()),
        priority: Set(new_project
            .priority
            .unwrap_or(ProjectPriority::Medium)
            .as_str()
            .to_string()),
        is_public: Set(new_project.is_public),
        progress: Set(0),
        start_date: Set(new_project.start_date),
        due_date: Set(new_project.due_date),
        completed_at: Set(None),
        estimated_hours: Set(new_project.estimated_hours),
        actual_hours: Set(None),
        material: Set(new_project.material),
        filament_weight_start: Set(new_project.filament_weight_start),
        filament_weight_end: Set(None),
        filament_cost: Set(None),
        team_members: Set(json!([])),
        tags: Set(json!(dedup(new_project.tags))),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let created = project.insert(db).await?;
    info!(project_id = created.id, owner_id = owner.id, "project created");
    Ok(created)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Loads a non-deleted project without access checks.
pub async fn find_project(db: &DatabaseConnection, project_id: i64) -> Result<project::Model> {
    Project::find_by_id(project_id)
        .filter(project::Column::IsDeleted.eq(false))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("project", project_id))
}

/// Loads a project the viewer is allowed to see.
pub async fn get_project(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
) -> Result<project::Model> {
    let model = find_project(db, project_id).await?;
    if !can_view(viewer, &model) {
        return Err(Error::Forbidden {
            message: "You do not have access to this project".to_string(),
        });
    }
    Ok(model)
}

pub(crate) async fn get_editable_project(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
) -> Result<project::Model> {
    let model = find_project(db, project_id).await?;
    if !can_edit(viewer, &model) {
        return Err(Error::Forbidden {
            message: "Only the owner can modify this project".to_string(),
        });
    }
    Ok(model)
}

/// Lists projects visible to `viewer`, newest first.
///
/// Admins see every project; other users see their own, public ones and the
/// ones whose team they belong to. Team membership lives in a JSON column, so
/// visibility and paging are applied after loading for non-admins.
pub async fn list_projects(
    db: &DatabaseConnection,
    viewer: &user::Model,
    filter: &ProjectFilter,
) -> Result<Vec<project::Model>> {
    let mut query = Project::find().filter(project::Column::IsDeleted.eq(false));
    if let Some(status) = filter.status {
        query = query.filter(project::Column::Status.eq(status.as_str()));
    }
    let query = query
        .order_by_desc(project::Column::CreatedAt)
        .order_by_desc(project::Column::Id);
    let skip = filter.skip.unwrap_or(0);
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);

    if viewer.is_admin() {
        return query
            .offset(skip)
            .limit(limit)
            .all(db)
            .await
            .map_err(Into::into);
    }
    let projects = query.all(db).await?;
    Ok(projects
        .into_iter()
        .filter(|model| can_view(viewer, model))
        .skip(usize::try_from(skip).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect())
}

/// Applies a partial update.
pub async fn update_project(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
    update: ProjectUpdate,
) -> Result<project::Model> {
    let model = get_editable_project(db, viewer, project_id).await?;
    validate_non_negative("estimated_hours", update.estimated_hours)?;
    validate_non_negative("actual_hours", update.actual_hours)?;
    validate_non_negative("filament_weight_start", update.filament_weight_start)?;
    validate_non_negative("filament_weight_end", update.filament_weight_end)?;
    validate_non_negative("filament_cost", update.filament_cost)?;
    validate_dates(
        update.start_date.or(model.start_date),
        update.due_date.or(model.due_date),
    )?;

    let mut active: project::ActiveModel = model.into();
    if let Some(name) = update.name {
        active.name = Set(validate_name(&name)?);
    }
    if let Some(description) = update.description {
        active.description = Set(Some(description));
    }
    if let Some(project_type) = update.project_type {
        active.project_type = Set(project_type.as_str().to_string());
    }
    if let Some(status) = update.status {
        active.status = Set(status.as_str().to_string());
        if status == ProjectStatus::Completed {
            active.progress = Set(100);
            active.completed_at = Set(Some(Utc::now()));
        }
    }
    if let Some(priority) = update.priority {
        active.priority = Set(priority.as_str().to_string());
    }
    if let Some(is_public) = update.is_public {
        active.is_public = Set(is_public);
    }
    if let Some(start_date) = update.start_date {
        active.start_date = Set(Some(start_date));
    }
    if let Some(due_date) = update.due_date {
        active.due_date = Set(Some(due_date));
    }
    if let Some(hours) = update.estimated_hours {
        active.estimated_hours = Set(Some(hours));
    }
    if let Some(hours) = update.actual_hours {
        active.actual_hours = Set(Some(hours));
    }
    if let Some(material) = update.material {
        active.material = Set(Some(material));
    }
    if let Some(weight) = update.filament_weight_start {
        active.filament_weight_start = Set(Some(weight));
    }
    if let Some(weight) = update.filament_weight_end {
        active.filament_weight_end = Set(Some(weight));
    }
    if let Some(cost) = update.filament_cost {
        active.filament_cost = Set(Some(cost));
    }
    if let Some(tags) = update.tags {
        active.tags = Set(json!(dedup(tags)));
    }
    active.updated_at = Set(Utc::now());

    active.update(db).await.map_err(Into::into)
}

/// Sets progress (clamped to 0..=100) and advances the status accordingly.
pub async fn update_progress(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
    progress: i32,
) -> Result<project::Model> {
    let model = get_editable_project(db, viewer, project_id).await?;
    let current: ProjectStatus = model.status.parse()?;
    let (progress, status) = apply_progress(current, progress);

    let mut active: project::ActiveModel = model.into();
    active.progress = Set(progress);
    active.status = Set(status.as_str().to_string());
    if status == ProjectStatus::Completed && current != ProjectStatus::Completed {
        active.completed_at = Set(Some(Utc::now()));
    }
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;
    info!(project_id, progress, status = %status, "project progress updated");
    Ok(updated)
}

/// Soft deletes the project.
pub async fn delete_project(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
) -> Result<project::Model> {
    let model = get_editable_project(db, viewer, project_id).await?;
    let mut active: project::ActiveModel = model.into();
    active.is_deleted = Set(true);
    active.updated_at = Set(Utc::now());
    let deleted = active.update(db).await?;
    info!(project_id, "project deleted");
    Ok(deleted)
}

/// Adds an existing user to the team. Adding a current member is a no-op.
pub async fn add_team_member(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
    member_id: i64,
) -> Result<project::Model> {
    let model = get_editable_project(db, viewer, project_id).await?;
    User::find_by_id(member_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", member_id))?;

    let mut members = team_members(&model);
    if members.contains(&member_id) {
        return Ok(model);
    }
    members.push(member_id);
    let mut active: project::ActiveModel = model.into();
    active.team_members = Set(json!(members));
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}

pub async fn remove_team_member(
    db: &DatabaseConnection,
    viewer: &user::Model,
    project_id: i64,
    member_id: i64,
) -> Result<project::Model> {
    let model = get_editable_project(db, viewer, project_id).await?;
    let mut members = team_members(&model);
    members.retain(|id| *id != member_id);
    let mut active: project::ActiveModel = model.into();
    active.team_members = Set(json!(members));
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;
    use chrono::Duration;

    #[test]
    fn test_apply_progress() {
        assert_eq!(
            apply_progress(ProjectStatus::Draft, 30),
            (30, ProjectStatus::InProgress)
        );
        assert_eq!(
            apply_progress(ProjectStatus::Testing, 150),
            (100, ProjectStatus::Completed)
        );
        assert_eq!(
            apply_progress(ProjectStatus::Draft, -5),
            (0, ProjectStatus::Draft)
        );
        assert_eq!(
            apply_progress(ProjectStatus::OnHold, 40),
            (40, ProjectStatus::OnHold)
        );
    }

    #[tokio::test]
    async fn test_create_project_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = sample_user(1);

        let result = create_project(
            &db,
            &owner,
            NewProject {
                name: "   ".to_string(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = create_project(
            &db,
            &owner,
            NewProject {
                name: "Bracket".to_string(),
                estimated_hours: Some(-1.0),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let now = Utc::now();
        let result = create_project(
            &db,
            &owner,
            NewProject {
                name: "Bracket".to_string(),
                start_date: Some(now),
                due_date: Some(now - Duration::days(1)),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_and_progress() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let created = create_test_project(&db, &owner, "Filament holder").await?;
        assert_eq!(created.status, "draft");
        assert_eq!(created.progress, 0);
        assert_eq!(tags(&created), vec!["test".to_string()]);

        let updated = update_progress(&db, &owner, created.id, 45).await?;
        assert_eq!(updated.progress, 45);
        assert_eq!(updated.status, "in_progress");

        let done = update_progress(&db, &owner, created.id, 120).await?;
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, "completed");
        assert!(done.completed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_access_rules() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let stranger = create_test_user(&db, "stranger").await?;
        let private = create_test_project(&db, &owner, "Private").await?;

        let result = get_project(&db, &stranger, private.id).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));
        let result = update_progress(&db, &stranger, private.id, 10).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));

        add_team_member(&db, &owner, private.id, stranger.id).await?;
        let seen = get_project(&db, &stranger, private.id).await?;
        assert_eq!(team_members(&seen), vec![stranger.id]);

        // Team members can read but not edit
        let result = delete_project(&db, &stranger, private.id).await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));

        let listed = list_projects(&db, &stranger, &ProjectFilter::default()).await?;
        assert!(listed.iter().any(|p| p.id == private.id));

        remove_team_member(&db, &owner, private.id, stranger.id).await?;
        assert!(get_project(&db, &stranger, private.id).await.is_err());
        let listed = list_projects(&db, &stranger, &ProjectFilter::default()).await?;
        assert!(listed.iter().all(|p| p.id != private.id));

        let missing = add_team_member(&db, &owner, private.id, 9_999).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_soft_delete() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let other = create_test_user(&db, "other").await?;
        let first = create_test_project(&db, &owner, "First").await?;
        create_test_project(&db, &owner, "Second").await?;
        create_project(
            &db,
            &other,
            NewProject {
                name: "Shared".to_string(),
                is_public: true,
                ..Default::default()
            },
        )
        .await?;
        create_test_project(&db, &other, "Hidden").await?;

        let visible = list_projects(&db, &owner, &ProjectFilter::default()).await?;
        let names: Vec<&str> = visible.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Shared", "Second", "First"]);

        update_progress(&db, &owner, first.id, 10).await?;
        let filtered = list_projects(
            &db,
            &owner,
            &ProjectFilter {
                status: Some(ProjectStatus::InProgress),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(filtered.len(), 1);

        delete_project(&db, &owner, first.id).await?;
        assert!(matches!(
            get_project(&db, &owner, first.id).await,
            Err(Error::NotFound { .. })
        ));
        let page = list_projects(
            &db,
            &owner,
            &ProjectFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(page.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_update_and_metrics() -> Result<()> {
        let db = setup_test_db().await?;
        let owner = create_test_user(&db, "owner").await?;
        let created = create_test_project(&db, &owner, "Gearbox").await?;

        let updated = update_project(
            &db,
            &owner,
            created.id,
            ProjectUpdate {
                estimated_hours: Some(8.0),
                actual_hours: Some(10.0),
                filament_weight_start: Some(1000.0),
                filament_weight_end: Some(750.0),
                filament_cost: Some(12.5),
                priority: Some(ProjectPriority::High),
                due_date: Some(Utc::now() - Duration::days(2)),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.priority, "high");
        assert_eq!(updated.name, "Gearbox");

        let m = metrics(&updated, Utc::now());
        assert_eq!(m.filament_used, Some(250.0));
        assert_eq!(m.filament_cost_per_gram, Some(0.05));
        assert_eq!(m.efficiency, Some(80.0));
        assert!(m.is_overdue);
        assert_eq!(m.days_remaining, Some(0));
        assert!(!m.is_active);
        Ok(())
    }
}
