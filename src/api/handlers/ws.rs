//! `GET /ws`: upgrades to a WebSocket bound to the connection manager.

use crate::{
    api::state::AppState,
    core::auth::resolve_access_token,
    realtime::{envelope, handlers::handle_text},
};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Anonymous connections are allowed; a bad token just leaves the user unset
    let user_id = match query.token.as_deref() {
        Some(token) => resolve_access_token(&state.db, token).await.ok().map(|u| u.id),
        None => None,
    };
    ws.on_upgrade(move |socket| serve_socket(state, socket, user_id))
}

async fn serve_socket(state: AppState, socket: WebSocket, user_id: Option<i64>) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<Value>();
    let id = state.realtime.connect(outbox, user_id).await;
    info!(connection_id = %id, ?user_id, "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                break;
            }
        }
    });

    let heartbeat = {
        let manager = state.realtime.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let beat = envelope("heartbeat", json!({"timestamp": Utc::now()}));
                if !manager.send_to(&id, &beat).await {
                    break;
                }
            }
        })
    };

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_text(&state.realtime, &state.settings.alerts, &id, &text).await;
            }
            Message::Close(_) => break,
            other => debug!(connection_id = %id, "ignoring frame: {other:?}"),
        }
    }

    heartbeat.abort();
    state.realtime.disconnect(&id).await;
    writer.abort();
    info!(connection_id = %id, "websocket disconnected");
}
