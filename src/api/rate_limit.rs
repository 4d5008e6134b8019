//! Rate limiting middleware and the idle bucket cleanup task.

use crate::{
    api::{auth, error::ServerError, state::AppState},
    core::rate_limit::{Decision, RateLimitRegistry, client_key},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Paths never limited.
const EXEMPT_PREFIXES: [&str; 1] = ["/health"];

pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return next.run(request).await;
    }

    let headers = request.headers();
    // Invalid credentials fall back to the address key; the handler rejects them later
    let user_id = auth::authenticate(&state, headers).await.ok().map(|u| u.id);
    let forwarded = auth::forwarded_for(headers);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let key = client_key(user_id, forwarded.as_deref(), peer.as_deref());

    match state.rate_limits.check(&path, &key).await {
        None => next.run(request).await,
        Some(Decision::Limited { limit, retry_after }) => {
            let mut response = ServerError::rate_limited(retry_after).into_response();
            response
                .headers_mut()
                .insert("x-ratelimit-limit", HeaderValue::from(limit));
            response
        }
        Some(Decision::Allowed { limit, remaining }) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
    }
}

/// Periodically drops buckets of clients that have been idle long enough to refill.
pub fn spawn_cleanup(registry: Arc<RateLimitRegistry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(registry.cleanup_interval());
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            registry.purge_idle().await;
        }
    })
}
