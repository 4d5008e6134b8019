//! Connection registry for WebSocket fan-out.
//!
//! Each connection is an unbounded channel drained by its socket task. The
//! registry indexes connections by user, by device and by room; a connection
//! whose channel is closed is pruned from every index on the next send.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Messages queued for one socket.
pub type Outbox = mpsc::UnboundedSender<Value>;

/// Version advertised in `connection_established`.
pub const SERVER_VERSION: &str = "1.0.0";

/// Builds a `{type, data}` envelope.
#[must_use]
pub fn envelope(kind: &str, data: Value) -> Value {
    json!({ "type": kind, "data": data })
}

#[derive(Debug)]
struct Connection {
    outbox: Outbox,
    user_id: Option<i64>,
    device_id: Option<String>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<String, Connection>,
    users: HashMap<i64, HashSet<String>>,
    devices: HashMap<String, HashSet<String>>,
    rooms: HashMap<String, HashSet<String>>,
    total_connections: u64,
    messages_sent: u64,
}

fn unindex<K: std::hash::Hash + Eq>(index: &mut HashMap<K, HashSet<String>>, key: &K, id: &str) {
    if let Some(members) = index.get_mut(key) {
        members.remove(id);
        if members.is_empty() {
            index.remove(key);
        }
    }
}

impl Registry {
    fn remove(&mut self, id: &str) -> bool {
        let Some(connection) = self.connections.remove(id) else {
            return false;
        };
        if let Some(user_id) = connection.user_id {
            unindex(&mut self.users, &user_id, id);
        }
        if let Some(device_id) = &connection.device_id {
            unindex(&mut self.devices, device_id, id);
        }
        self.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        info!(connection_id = id, "websocket connection closed");
        true
    }

    fn deliver(&mut self, id: &str, message: &Value) -> bool {
        let sent = self
            .connections
            .get(id)
            .is_some_and(|c| c.outbox.send(message.clone()).is_ok());
        if sent {
            self.messages_sent += 1;
        } else if self.connections.contains_key(id) {
            debug!(connection_id = id, "pruning closed websocket connection");
            self.remove(id);
        }
        sent
    }

    fn deliver_all(&mut self, targets: Vec<String>, message: &Value) -> usize {
        targets
            .iter()
            .filter(|id| self.deliver(id, message))
            .count()
    }
}

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub messages_sent: u64,
    pub active_rooms: usize,
    pub connected_users: usize,
    pub connected_devices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_id: Option<i64>,
    pub device_id: Option<String>,
    pub rooms: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

/// Shared handle to the registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<RwLock<Registry>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and greets it with `connection_established`.
    pub async fn connect(&self, outbox: Outbox, user_id: Option<i64>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut registry = self.inner.write().await;
        registry.connections.insert(
            id.clone(),
            Connection {
                outbox,
                user_id,
                device_id: None,
                connected_at: now,
            },
        );
        if let Some(user_id) = user_id {
            registry.users.entry(user_id).or_default().insert(id.clone());
        }
        registry.total_connections += 1;

        let greeting = envelope(
            "connection_established",
            json!({
                "connection_id": id,
                "timestamp": now,
                "server_info": {
                    "version": SERVER_VERSION,
                    "features": ["heartbeat", "rooms", "broadcast"],
                },
            }),
        );
        registry.deliver(&id, &greeting);
        info!(connection_id = %id, ?user_id, "websocket connection established");
        id
    }

    /// Removes a connection from every index. Returns false if it was unknown.
    pub async fn disconnect(&self, id: &str) -> bool {
        self.inner.write().await.remove(id)
    }

    /// Associates a connection with a device id.
    pub async fn attach_device(&self, id: &str, device_id: &str) -> bool {
        let mut registry = self.inner.write().await;
        let Some(connection) = registry.connections.get_mut(id) else {
            return false;
        };
        let previous = connection.device_id.replace(device_id.to_string());
        if let Some(previous) = previous {
            unindex(&mut registry.devices, &previous, id);
        }
        registry
            .devices
            .entry(device_id.to_string())
            .or_default()
            .insert(id.to_string());
        true
    }

    pub async fn send_to(&self, id: &str, message: &Value) -> bool {
        self.inner.write().await.deliver(id, message)
    }

    /// Sends to every connection except `exclude`. Returns the number delivered.
    pub async fn broadcast(&self, message: &Value, exclude: Option<&str>) -> usize {
        let mut registry = self.inner.write().await;
        let targets = registry
            .connections
            .keys()
            .filter(|id| Some(id.as_str()) != exclude)
            .cloned()
            .collect();
        registry.deliver_all(targets, message)
    }

    pub async fn send_to_user(&self, user_id: i64, message: &Value) -> usize {
        let mut registry = self.inner.write().await;
        let targets = registry
            .users
            .get(&user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        registry.deliver_all(targets, message)
    }

    pub async fn send_to_device(&self, device_id: &str, message: &Value) -> usize {
        let mut registry = self.inner.write().await;
        let targets = registry
            .devices
            .get(device_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        registry.deliver_all(targets, message)
    }

    pub async fn send_to_room(&self, room: &str, message: &Value, exclude: Option<&str>) -> usize {
        let mut registry = self.inner.write().await;
        let targets = registry
            .rooms
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter(|id| Some(id.as_str()) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        registry.deliver_all(targets, message)
    }

    /// Adds a connection to a room and tells the other members.
    pub async fn join_room(&self, id: &str, room: &str) -> bool {
        {
            let mut registry = self.inner.write().await;
            if !registry.connections.contains_key(id) {
                return false;
            }
            registry
                .rooms
                .entry(room.to_string())
                .or_default()
                .insert(id.to_string());
        }
        let notice = envelope(
            "user_joined_room",
            json!({"connection_id": id, "room_name": room, "timestamp": Utc::now()}),
        );
        self.send_to_room(room, &notice, Some(id)).await;
        info!(connection_id = id, room, "joined room");
        true
    }

    /// Removes a connection from a room; empty rooms are dropped.
    pub async fn leave_room(&self, id: &str, room: &str) -> bool {
        let remaining = {
            let mut registry = self.inner.write().await;
            let Some(members) = registry.rooms.get_mut(room) else {
                return false;
            };
            if !members.remove(id) {
                return false;
            }
            let remaining = members.len();
            if remaining == 0 {
                registry.rooms.remove(room);
            }
            remaining
        };
        if remaining > 0 {
            let notice = envelope(
                "user_left_room",
                json!({"connection_id": id, "room_name": room, "timestamp": Utc::now()}),
            );
            self.send_to_room(room, &notice, Some(id)).await;
        }
        info!(connection_id = id, room, "left room");
        true
    }

    pub async fn room_members(&self, room: &str) -> Vec<String> {
        let registry = self.inner.read().await;
        let mut members: Vec<String> = registry
            .rooms
            .get(room)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn connection_info(&self, id: &str) -> Option<ConnectionInfo> {
        let registry = self.inner.read().await;
        let connection = registry.connections.get(id)?;
        let mut rooms: Vec<String> = registry
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(name, _)| name.clone())
            .collect();
        rooms.sort();
        Some(ConnectionInfo {
            connection_id: id.to_string(),
            user_id: connection.user_id,
            device_id: connection.device_id.clone(),
            rooms,
            connected_at: connection.connected_at,
        })
    }

    pub async fn stats(&self) -> ManagerStats {
        let registry = self.inner.read().await;
        ManagerStats {
            total_connections: registry.total_connections,
            active_connections: registry.connections.len(),
            messages_sent: registry.messages_sent,
            active_rooms: registry.rooms.len(),
            connected_users: registry.users.len(),
            connected_devices: registry.devices.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Value>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    async fn connected(
        manager: &ConnectionManager,
        user_id: Option<i64>,
    ) -> (String, UnboundedReceiver<Value>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.connect(tx, user_id).await;
        let greeting = drain(&mut rx);
        assert_eq!(greeting[0]["type"], "connection_established");
        assert_eq!(greeting[0]["data"]["server_info"]["version"], SERVER_VERSION);
        (id, rx)
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let manager = ConnectionManager::new();
        let (a, mut rx_a) = connected(&manager, Some(1)).await;
        let (_b, mut rx_b) = connected(&manager, None).await;

        let sent = manager.broadcast(&envelope("ping", json!({})), Some(a.as_str())).await;
        assert_eq!(sent, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        assert_eq!(manager.send_to_user(1, &envelope("hi", json!({}))).await, 1);
        assert_eq!(manager.send_to_user(2, &envelope("hi", json!({}))).await, 0);
    }

    #[tokio::test]
    async fn test_rooms_notify_members() {
        let manager = ConnectionManager::new();
        let (a, mut rx_a) = connected(&manager, None).await;
        let (b, mut rx_b) = connected(&manager, None).await;

        assert!(manager.join_room(&a, "device_7").await);
        assert!(manager.join_room(&b, "device_7").await);
        let joined = drain(&mut rx_a);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["type"], "user_joined_room");
        assert!(drain(&mut rx_b).is_empty());

        assert_eq!(manager.room_members("device_7").await.len(), 2);
        assert!(manager.leave_room(&b, "device_7").await);
        assert_eq!(drain(&mut rx_a)[0]["type"], "user_left_room");

        assert!(manager.leave_room(&a, "device_7").await);
        assert_eq!(manager.stats().await.active_rooms, 0);
        assert!(!manager.leave_room(&a, "device_7").await);
        assert!(!manager.join_room("missing", "device_7").await);
    }

    #[tokio::test]
    async fn test_closed_connections_are_pruned() {
        let manager = ConnectionManager::new();
        let (a, rx_a) = connected(&manager, Some(3)).await;
        let (b, mut rx_b) = connected(&manager, None).await;
        manager.join_room(&a, "lobby").await;
        manager.join_room(&b, "lobby").await;
        assert!(manager.attach_device(&a, "ESP-1").await);
        drop(rx_a);

        let delivered = manager.send_to_room("lobby", &envelope("x", json!({})), None).await;
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_b).len(), 1);

        let stats = manager.stats().await;
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.connected_users, 0);
        assert_eq!(stats.connected_devices, 0);
        assert!(manager.connection_info(&a).await.is_none());
    }

    #[tokio::test]
    async fn test_connection_info_and_disconnect() {
        let manager = ConnectionManager::new();
        let (a, _rx) = connected(&manager, Some(9)).await;
        manager.attach_device(&a, "CONV-1").await;
        manager.join_room(&a, "b").await;
        manager.join_room(&a, "a").await;

        let info = manager.connection_info(&a).await.unwrap();
        assert_eq!(info.user_id, Some(9));
        assert_eq!(info.device_id.as_deref(), Some("CONV-1"));
        assert_eq!(info.rooms, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manager.send_to_device("CONV-1", &envelope("cmd", json!({}))).await, 1);

        assert!(manager.disconnect(&a).await);
        assert!(!manager.disconnect(&a).await);
        let stats = manager.stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.active_rooms, 0);
    }
}
