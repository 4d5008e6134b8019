//! Request authentication: bearer access tokens or `X-API-Key`.

use crate::{
    api::{error::ServerError, state::AppState},
    core::auth::{ClientInfo, resolve_access_token, resolve_api_key},
    entities::user,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header, request::Parts},
};

pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub user::Model);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).await.map(Self)
    }
}

/// Resolves the caller from an API key if one is sent, else from the bearer token.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<user::Model, ServerError> {
    if let Some(key) = header_str(headers, API_KEY_HEADER) {
        return resolve_api_key(&state.db, key).await.map_err(Into::into);
    }
    let token = bearer_token(headers)?;
    resolve_access_token(&state.db, &token)
        .await
        .map_err(Into::into)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, ServerError> {
    let value = header_str(headers, header::AUTHORIZATION.as_str()).unwrap_or_default();
    let token = value.strip_prefix("Bearer ").unwrap_or("").trim();
    if token.is_empty() {
        return Err(ServerError::new(
            StatusCode::UNAUTHORIZED,
            "missing bearer token",
        ));
    }
    Ok(token.to_string())
}

/// First `X-Forwarded-For` entry.
pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(ToString::to_string)
}

pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        user_agent: header_str(headers, header::USER_AGENT.as_str()).map(ToString::to_string),
        ip_address: forwarded_for(headers),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(bearer_token(&headers).unwrap(), "tok123");
    }

    #[test]
    fn test_client_info_uses_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let info = client_info(&headers);
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }
}
