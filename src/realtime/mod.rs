//! Real-time fan-out to WebSocket clients.

/// Envelope handlers for incoming client messages
pub mod handlers;
/// Connection registry with user, device and room indexes
pub mod manager;

pub use manager::{ConnectionManager, ManagerStats, envelope};
