//! HTTP surface: REST routes under `/api/v1`, health probes and `/ws`.

pub mod auth;
pub mod error;
mod handlers;
pub mod rate_limit;
pub mod state;

pub use error::ServerError;
pub use state::AppState;

use axum::{Router, http::HeaderValue, middleware};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Builds the complete application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.allowed_origins);
    Router::new()
        .nest("/api/v1", handlers::api_routes())
        .merge(handlers::root_routes())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let parsed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(parsed))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        config::settings::Settings,
        mqtt::CommandPublisher,
        errors::Result,
        test_utils::{RecordingPublisher, TEST_PASSWORD, setup_test_db},
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    async fn test_app(settings: Settings) -> Result<(Router, Arc<RecordingPublisher>)> {
        let db = setup_test_db().await?;
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(
            db,
            settings,
            publisher.clone() as Arc<dyn CommandPublisher>,
            Some(Arc::new(AtomicBool::new(true))),
        );
        Ok((router(state), publisher))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, value)
    }

    async fn register_and_login(app: &Router, username: &str) -> String {
        let (status, _, _) = call(
            app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({
                "email": format!("{username}@example.com"),
                "username": username,
                "password": TEST_PASSWORD,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _, body) = call(
            app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({"login": username, "password": TEST_PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_endpoints() -> Result<()> {
        let (app, _) = test_app(Settings::default()).await?;

        let (status, _, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _, body) = call(&app, Method::GET, "/health/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        let (status, _, body) = call(&app, Method::GET, "/health/detailed", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"]["status"], "healthy");
        assert_eq!(body["checks"]["mqtt"]["status"], "healthy");
        Ok(())
    }

    #[tokio::test]
    async fn test_auth_required() -> Result<()> {
        let (app, _) = test_app(Settings::default()).await?;
        let (status, _, body) = call(&app, Method::GET, "/api/v1/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _, _) =
            call(&app, Method::GET, "/api/v1/auth/me", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_to_production_flow() -> Result<()> {
        let (app, _) = test_app(Settings::default()).await?;
        let token = register_and_login(&app, "maker").await;

        let (status, _, me) = call(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "maker");
        assert!(me.get("hashed_password").is_none());

        let (status, _, project) = call(
            &app,
            Method::POST,
            "/api/v1/projects",
            Some(&token),
            Some(json!({"name": "Spool holder"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let project_id = project["id"].as_i64().unwrap();
        assert_eq!(project["metrics"]["is_active"], false);

        let (status, _, estimate) = call(
            &app,
            Method::POST,
            "/api/v1/budgets/calculate",
            Some(&token),
            Some(json!({"specifications": {"material": "PETG"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(estimate["material"], "PETG");

        let (status, _, budget) = call(
            &app,
            Method::POST,
            "/api/v1/budgets",
            Some(&token),
            Some(json!({"project_id": project_id, "specifications": {"material": "PLA"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let budget_id = budget["id"].as_i64().unwrap();

        let order_body = json!({"budget_id": budget_id, "quantity": 3});
        let (status, _, body) = call(
            &app,
            Method::POST,
            "/api/v1/production/orders",
            Some(&token),
            Some(order_body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");

        let uri = format!("/api/v1/budgets/{budget_id}/approve");
        let (status, _, _) = call(&app, Method::POST, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, order) = call(
            &app,
            Method::POST,
            "/api/v1/production/orders",
            Some(&token),
            Some(order_body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let order_id = order["id"].as_i64().unwrap();

        let uri = format!("/api/v1/production/orders/{order_id}/status");
        let (status, _, updated) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"status": "in_progress"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "in_progress");

        let (_, _, dashboard) = call(
            &app,
            Method::GET,
            "/api/v1/production/dashboard",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(dashboard["total_orders"], 1);
        assert_eq!(dashboard["in_progress"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_team_membership_routes() -> Result<()> {
        let (app, _) = test_app(Settings::default()).await?;
        let owner = register_and_login(&app, "owner").await;
        let helper = register_and_login(&app, "helper").await;
        let (_, _, me) = call(&app, Method::GET, "/api/v1/auth/me", Some(&helper), None).await;
        let helper_id = me["id"].as_i64().unwrap();

        let (_, _, project) = call(
            &app,
            Method::POST,
            "/api/v1/projects",
            Some(&owner),
            Some(json!({"name": "Enclosure"})),
        )
        .await;
        let project_id = project["id"].as_i64().unwrap();
        let team_uri = format!("/api/v1/projects/{project_id}/team/{helper_id}");

        // Only the owner manages the team
        let (status, _, _) = call(&app, Method::POST, &team_uri, Some(&helper), None).await;
        assert_ne!(status, StatusCode::OK);

        let (status, _, body) = call(&app, Method::POST, &team_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["team_members"], json!([helper_id]));

        let (_, _, listed) = call(&app, Method::GET, "/api/v1/projects", Some(&helper), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _, body) = call(&app, Method::DELETE, &team_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["team_members"], json!([]));
        let (_, _, listed) = call(&app, Method::GET, "/api/v1/projects", Some(&helper), None).await;
        assert!(listed.as_array().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_device_telemetry_and_command() -> Result<()> {
        let (app, publisher) = test_app(Settings::default()).await?;
        let token = register_and_login(&app, "operator").await;

        let (status, _, device) = call(
            &app,
            Method::POST,
            "/api/v1/devices",
            Some(&token),
            Some(json!({
                "serial_number": "ESP-100",
                "name": "Spool scale",
                "device_type": "esp32_monitor",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let device_id = device["id"].as_i64().unwrap();

        let uri = format!("/api/v1/devices/{device_id}/telemetry");
        let (status, _, recorded) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"metric": "temperature", "value": 95.0, "unit": "C"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(recorded["alert_id"].is_i64());

        let (_, _, alerts) = call(&app, Method::GET, "/api/v1/alerts?active_only=true", Some(&token), None).await;
        assert_eq!(alerts.as_array().unwrap().len(), 1);

        let uri = format!("/api/v1/devices/{device_id}/command");
        let (status, _, body) = call(
            &app,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"command": "tare"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["topic"], "3dpot/esp32/ESP-100/command");
        let sent = publisher.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(serde_json::from_slice::<Value>(&sent[0].1)?["command"], "tare");

        let (status, _, _) =
            call(&app, Method::GET, "/api/v1/devices/9999", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_with_retry_after() -> Result<()> {
        let mut settings = Settings::default();
        settings.rate_limit.requests_per_minute = 1;
        settings.rate_limit.burst = Some(1);
        let (app, _) = test_app(settings).await?;

        let (status, headers, _) = call(&app, Method::GET, "/api/v1/alerts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers["x-ratelimit-limit"], "1");

        let (status, headers, body) = call(&app, Method::GET, "/api/v1/alerts", None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "rate_limited");
        assert!(headers.contains_key("retry-after"));

        // Health probes are never limited
        let (status, _, _) = call(&app, Method::GET, "/health/live", None, None).await;
        assert_eq!(status, StatusCode::OK);
        Ok(())
    }
}
