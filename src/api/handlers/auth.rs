use crate::{
    api::{
        auth::{CurrentUser, bearer_token, client_info},
        error::ServerError,
        state::AppState,
    },
    core::auth::{self, NewUser, TokenPair},
    entities::{auth_token, user},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: user::Model,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<user::Model>), ServerError> {
    let created = auth::register_user(&state.db, &state.settings.auth, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    if payload.login.trim().is_empty() || payload.password.is_empty() {
        return Err(ServerError::new(
            StatusCode::BAD_REQUEST,
            "login and password required",
        ));
    }
    let (user, tokens) = auth::authenticate(
        &state.db,
        &state.settings.auth,
        &payload.login,
        &payload.password,
        &client_info(&headers),
    )
    .await?;
    Ok(Json(LoginResponse { user, tokens }))
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ServerError> {
    let tokens = auth::refresh_tokens(
        &state.db,
        &state.settings.auth,
        &payload.refresh_token,
        &client_info(&headers),
    )
    .await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Result<Json<Value>, ServerError> {
    let revoked = if query.all {
        auth::logout_all(&state.db, user.id).await?
    } else {
        let token = bearer_token(&headers)?;
        u64::from(auth::logout(&state.db, &token).await?)
    };
    Ok(Json(json!({"message": "Logged out", "revoked": revoked})))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<user::Model> {
    Json(user)
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ServerError> {
    auth::change_password(
        &state.db,
        &state.settings.auth,
        &user,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    Ok(Json(json!({"message": "Password changed, please log in again"})))
}

pub async fn create_api_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let key = auth::generate_api_key(&state.db, &user).await?;
    Ok((StatusCode::CREATED, Json(json!({"api_key": key}))))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, ServerError> {
    auth::revoke_api_key(&state.db, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<auth_token::Model>>, ServerError> {
    Ok(Json(auth::list_sessions(&state.db, user.id).await?))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    auth::revoke_session(&state.db, user.id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
