//! Authentication business logic.
//!
//! Passwords are hashed with Argon2. Access and refresh tokens are random
//! 32-byte hex strings; only their SHA-256 is persisted in `auth_tokens`, so a
//! leaked database does not leak usable credentials. Refresh tokens rotate on
//! every use and double as the user's login sessions.

use crate::{
    config::settings::AuthSettings,
    core::string_enum,
    entities::{AuthToken, User, auth_token, user},
    errors::{Error, Result},
};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng, rand_core::RngCore},
};
use chrono::{Duration, Utc};
use rand::{Rng, distributions::Alphanumeric};
use sea_orm::{
    ActiveValue::Set, Condition, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

string_enum! {
    /// Account role.
    pub enum Role {
        Admin => "admin",
        User => "user",
        Developer => "developer",
    }
}

string_enum! {
    /// Kind of bearer token stored in `auth_tokens`.
    pub enum TokenKind {
        Access => "access",
        Refresh => "refresh",
    }
}

const API_KEY_LENGTH: usize = 32;
const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Outcome of checking a password against the configured policy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PasswordReport {
    pub min_length: bool,
    pub has_uppercase: bool,
    pub has_lowercase: bool,
    pub has_number: bool,
    pub has_special: bool,
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Checks `password` against every rule enabled in `policy`.
#[must_use]
pub fn validate_password_strength(password: &str, policy: &AuthSettings) -> PasswordReport {
    let min_length = password.chars().count() >= policy.password_min_length;
    let has_uppercase = password.chars().any(char::is_uppercase);
    let has_lowercase = password.chars().any(char::is_lowercase);
    let has_number = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| SPECIAL_CHARACTERS.contains(c));

    let mut errors = Vec::new();
    if !min_length {
        errors.push(format!(
            "Password must be at least {} characters long",
            policy.password_min_length
        ));
    }
    if policy.password_require_uppercase && !has_uppercase {
        errors.push("Password must contain an uppercase letter".to_string());
    }
    if policy.password_require_lowercase && !has_lowercase {
        errors.push("Password must contain a lowercase letter".to_string());
    }
    if policy.password_require_numbers && !has_number {
        errors.push("Password must contain a number".to_string());
    }
    if policy.password_require_special && !has_special {
        errors.push("Password must contain a special character".to_string());
    }

    PasswordReport {
        min_length,
        has_uppercase,
        has_lowercase,
        has_number,
        has_special,
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Hashes a password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Config {
            message: format!("password hash error: {e}"),
        })
}

/// Returns true when `password` matches the stored PHC string.
#[must_use]
pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Random 32-byte token, hex encoded.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex SHA-256 of a token or API key.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_api_key_value() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// Where a login came from; stored on issued tokens.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Freshly issued credentials. The plaintext values exist only here.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: i64,
}

fn validate_email(email: &str) -> Result<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.contains(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("Invalid email address: {email}")))
    }
}

fn validate_username(username: &str) -> Result<()> {
    let length_ok = (3..=50).contains(&username.chars().count());
    let chars_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if length_ok && chars_ok {
        Ok(())
    } else {
        Err(Error::validation(
            "Username must be 3-50 characters of letters, digits, '_' or '-'",
        ))
    }
}

/// Finds a user by primary key.
pub async fn get_user_by_id(db: &DatabaseConnection, user_id: i64) -> Result<Option<user::Model>> {
    User::find_by_id(user_id).one(db).await.map_err(Into::into)
}

/// Finds a user whose username or (lowercased) email equals `login`.
pub async fn find_user_by_login(
    db: &DatabaseConnection,
    login: &str,
) -> Result<Option<user::Model>> {
    let login = login.trim();
    User::find()
        .filter(
            Condition::any()
                .add(user::Column::Username.eq(login))
                .add(user::Column::Email.eq(login.to_lowercase())),
        )
        .one(db)
        .await
        .map_err(Into::into)
}

/// Creates an account with the `user` role after validating the payload.
///
/// Email is stored lowercased; both email and username must be unused.
#[instrument(skip(db, policy, new_user), fields(username = %new_user.username))]
pub async fn register_user(
    db: &DatabaseConnection,
    policy: &AuthSettings,
    new_user: NewUser,
) -> Result<user::Model> {
    let email = new_user.email.trim().to_lowercase();
    let username = new_user.username.trim().to_string();
    validate_email(&email)?;
    validate_username(&username)?;

    let report = validate_password_strength(&new_user.password, policy);
    if !report.is_valid {
        return Err(Error::validation(report.errors.join("; ")));
    }

    if User::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::Conflict {
            message: "Email already registered".to_string(),
        });
    }
    if User::find()
        .filter(user::Column::Username.eq(username.as_str()))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::Conflict {
            message: "Username already taken".to_string(),
        });
    }

    let now = Utc::now();
    let account = user::ActiveModel {
        email: Set(email),
        username: Set(username),
        hashed_password: Set(hash_password(&new_user.password)?),
        full_name: Set(new_user.full_name),
        phone: Set(new_user.phone),
        company: Set(new_user.company),
        role: Set(Role::User.as_str().to_string()),
        is_active: Set(true),
        is_verified: Set(false),
        is_superuser: Set(false),
        preferred_language: Set("pt-BR".to_string()),
        timezone: Set("America/Sao_Paulo".to_string()),
        failed_login_attempts: Set(0),
        locked_until: Set(None),
        last_login_at: Set(None),
        api_key_hash: Set(None),
        api_key_created_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let created = account.insert(db).await?;
    info!(user_id = created.id, "user registered");
    Ok(created)
}

/// Changes a user's role; backs the `set-role` command.
pub async fn set_role(db: &DatabaseConnection, user_id: i64, role: Role) -> Result<user::Model> {
    let account = User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))?;
    let mut active: user::ActiveModel = account.into();
    active.role = Set(role.as_str().to_string());
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(Into::into)
}

async fn insert_token<C>(
    db: &C,
    user_id: i64,
    kind: TokenKind,
    ttl: Duration,
    client: &ClientInfo,
) -> Result<String>
where
    C: ConnectionTrait,
{
    let token = generate_token();
    let now = Utc::now();
    auth_token::ActiveModel {
        user_id: Set(user_id),
        token_hash: Set(hash_token(&token)),
        kind: Set(kind.as_str().to_string()),
        expires_at: Set(now + ttl),
        revoked: Set(false),
        user_agent: Set(client.user_agent.clone()),
        ip_address: Set(client.ip_address.clone()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(token)
}

async fn issue_token_pair<C>(
    db: &C,
    policy: &AuthSettings,
    user_id: i64,
    client: &ClientInfo,
) -> Result<TokenPair>
where
    C: ConnectionTrait,
{
    let access_ttl = Duration::minutes(policy.access_token_minutes);
    let refresh_ttl = Duration::days(policy.refresh_token_days);
    let access_token = insert_token(db, user_id, TokenKind::Access, access_ttl, client).await?;
    let refresh_token = insert_token(db, user_id, TokenKind::Refresh, refresh_ttl, client).await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "bearer",
        expires_in: access_ttl.num_seconds(),
        refresh_expires_in: refresh_ttl.num_seconds(),
    })
}

/// Verifies credentials and issues a token pair.
///
/// Failed attempts are counted on the user row; reaching
/// `max_failed_attempts` locks the account for `lockout_minutes`.
#[instrument(skip(db, policy, password, client))]
pub async fn authenticate(
    db: &DatabaseConnection,
    policy: &AuthSettings,
    login: &str,
    password: &str,
    client: &ClientInfo,
) -> Result<(user::Model, TokenPair)> {
    let account = find_user_by_login(db, login)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid credentials"))?;

    let now = Utc::now();
    if !account.is_active {
        return Err(Error::unauthorized("Account is disabled"));
    }
    if let Some(until) = account.locked_until.filter(|until| *until > now) {
        return Err(Error::Locked { until });
    }

    if !verify_password(&account.hashed_password, password) {
        let attempts = account.failed_login_attempts + 1;
        if attempts >= policy.max_failed_attempts {
            let until = now + Duration::minutes(policy.lockout_minutes);
            let mut active: user::ActiveModel = account.into();
            active.failed_login_attempts = Set(0);
            active.locked_until = Set(Some(until));
            active.update(db).await?;
            warn!(login, %until, "account locked after repeated failures");
            return Err(Error::Locked { until });
        }
        User::update_many()
            .col_expr(
                user::Column::FailedLoginAttempts,
                Expr::col(user::Column::FailedLoginAttempts).add(1),
            )
            .filter(user::Column::Id.eq(account.id))
            .exec(db)
            .await?;
        warn!(login, attempts, "failed login");
        return Err(Error::unauthorized("Invalid credentials"));
    }

    let txn = db.begin().await?;
    let mut active: user::ActiveModel = account.into();
    active.failed_login_attempts = Set(0);
    active.locked_until = Set(None);
    active.last_login_at = Set(Some(now));
    let account = active.update(&txn).await?;
    let tokens = issue_token_pair(&txn, policy, account.id, client).await?;
    txn.commit().await?;

    info!(user_id = account.id, "user logged in");
    Ok((account, tokens))
}

async fn find_live_token<C>(db: &C, token: &str, kind: TokenKind) -> Result<auth_token::Model>
where
    C: ConnectionTrait,
{
    AuthToken::find()
        .filter(auth_token::Column::TokenHash.eq(hash_token(token)))
        .filter(auth_token::Column::Kind.eq(kind.as_str()))
        .filter(auth_token::Column::Revoked.eq(false))
        .filter(auth_token::Column::ExpiresAt.gt(Utc::now()))
        .one(db)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid or expired token"))
}

/// Resolves a bearer access token to its active user.
pub async fn resolve_access_token(db: &DatabaseConnection, token: &str) -> Result<user::Model> {
    let row = find_live_token(db, token, TokenKind::Access).await?;
    let account = get_user_by_id(db, row.user_id)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid or expired token"))?;
    if !account.is_active {
        return Err(Error::unauthorized("Account is disabled"));
    }
    Ok(account)
}

/// Exchanges a refresh token for a new pair, revoking the old refresh token.
#[instrument(skip_all)]
pub async fn refresh_tokens(
    db: &DatabaseConnection,
    policy: &AuthSettings,
    refresh_token: &str,
    client: &ClientInfo,
) -> Result<TokenPair> {
    let txn = db.begin().await?;
    let row = find_live_token(&txn, refresh_token, TokenKind::Refresh).await?;
    let user_id = row.user_id;

    let mut active: auth_token::ActiveModel = row.into();
    active.revoked = Set(true);
    active.update(&txn).await?;

    let tokens = issue_token_pair(&txn, policy, user_id, client).await?;
    txn.commit().await?;
    info!(user_id, "refresh token rotated");
    Ok(tokens)
}

/// Revokes a single token of any kind. Returns false if it was unknown.
pub async fn logout(db: &DatabaseConnection, token: &str) -> Result<bool> {
    let result = AuthToken::update_many()
        .col_expr(auth_token::Column::Revoked, Expr::value(true))
        .filter(auth_token::Column::TokenHash.eq(hash_token(token)))
        .filter(auth_token::Column::Revoked.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Revokes every outstanding token of a user and returns how many were revoked.
pub async fn logout_all<C>(db: &C, user_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = AuthToken::update_many()
        .col_expr(auth_token::Column::Revoked, Expr::value(true))
        .filter(auth_token::Column::UserId.eq(user_id))
        .filter(auth_token::Column::Revoked.eq(false))
        .exec(db)
        .await?;
    info!(user_id, revoked = result.rows_affected, "all sessions revoked");
    Ok(result.rows_affected)
}

/// Active refresh tokens of a user, newest first.
pub async fn list_sessions(db: &DatabaseConnection, user_id: i64) -> Result<Vec<auth_token::Model>> {
    AuthToken::find()
        .filter(auth_token::Column::UserId.eq(user_id))
        .filter(auth_token::Column::Kind.eq(TokenKind::Refresh.as_str()))
        .filter(auth_token::Column::Revoked.eq(false))
        .filter(auth_token::Column::ExpiresAt.gt(Utc::now()))
        .order_by_desc(auth_token::Column::CreatedAt)
        .order_by_desc(auth_token::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Revokes one session belonging to `user_id`.
pub async fn revoke_session(db: &DatabaseConnection, user_id: i64, session_id: i64) -> Result<()> {
    let session = AuthToken::find_by_id(session_id)
        .filter(auth_token::Column::UserId.eq(user_id))
        .filter(auth_token::Column::Kind.eq(TokenKind::Refresh.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("session", session_id))?;
    let mut active: auth_token::ActiveModel = session.into();
    active.revoked = Set(true);
    active.update(db).await?;
    Ok(())
}

/// Replaces the password after checking the current one, then revokes all
/// tokens so other devices must log in again.
pub async fn change_password(
    db: &DatabaseConnection,
    policy: &AuthSettings,
    account: &user::Model,
    current_password: &str,
    new_password: &str,
) -> Result<()> {
    if !verify_password(&account.hashed_password, current_password) {
        return Err(Error::unauthorized("Current password is incorrect"));
    }
    if current_password == new_password {
        return Err(Error::validation(
            "New password must differ from the current password",
        ));
    }
    let report = validate_password_strength(new_password, policy);
    if !report.is_valid {
        return Err(Error::validation(report.errors.join("; ")));
    }

    let txn = db.begin().await?;
    let mut active: user::ActiveModel = account.clone().into();
    active.hashed_password = Set(hash_password(new_password)?);
    active.updated_at = Set(Utc::now());
    active.update(&txn).await?;
    logout_all(&txn, account.id).await?;
    txn.commit().await?;
    info!(user_id = account.id, "password changed");
    Ok(())
}

/// Issues a new API key, replacing any previous one. The key is returned once.
pub async fn generate_api_key(db: &DatabaseConnection, account: &user::Model) -> Result<String> {
    if !account.can_access_api() {
        return Err(Error::Forbidden {
            message: "API access requires the admin or developer role".to_string(),
        });
    }
    let key = generate_api_key_value();
    let mut active: user::ActiveModel = account.clone().into();
    active.api_key_hash = Set(Some(hash_token(&key)));
    active.api_key_created_at = Set(Some(Utc::now()));
    active.update(db).await?;
    info!(user_id = account.id, "api key generated");
    Ok(key)
}

pub async fn revoke_api_key(db: &DatabaseConnection, account: &user::Model) -> Result<()> {
    let mut active: user::ActiveModel = account.clone().into();
    active.api_key_hash = Set(None);
    active.api_key_created_at = Set(None);
    active.update(db).await?;
    Ok(())
}

/// Resolves an `X-API-Key` value to its user.
pub async fn resolve_api_key(db: &DatabaseConnection, key: &str) -> Result<user::Model> {
    let account = User::find()
        .filter(user::Column::ApiKeyHash.eq(hash_token(key)))
        .one(db)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid API key"))?;
    if !account.can_access_api() {
        return Err(Error::Forbidden {
            message: "API access disabled for this account".to_string(),
        });
    }
    Ok(account)
}

/// Deletes expired and revoked tokens.
pub async fn cleanup_expired_tokens(db: &DatabaseConnection) -> Result<u64> {
    let result = AuthToken::delete_many()
        .filter(
            Condition::any()
                .add(auth_token::Column::ExpiresAt.lte(Utc::now()))
                .add(auth_token::Column::Revoked.eq(true)),
        )
        .exec(db)
        .await?;
    info!(removed = result.rows_affected, "expired tokens cleaned up");
    Ok(result.rows_affected)
}
