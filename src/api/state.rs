use crate::{
    config::settings::Settings,
    core::{budget::CostCalculator, rate_limit::RateLimitRegistry},
    mqtt::CommandPublisher,
    realtime::ConnectionManager,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub settings: Arc<Settings>,
    pub realtime: ConnectionManager,
    pub publisher: Arc<dyn CommandPublisher>,
    /// `None` when the MQTT bridge is disabled
    pub mqtt_connected: Option<Arc<AtomicBool>>,
    pub rate_limits: Arc<RateLimitRegistry>,
    pub calculator: CostCalculator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        settings: Settings,
        publisher: Arc<dyn CommandPublisher>,
        mqtt_connected: Option<Arc<AtomicBool>>,
    ) -> Self {
        let rate_limits = Arc::new(RateLimitRegistry::from_settings(&settings.rate_limit));
        Self {
            db,
            settings: Arc::new(settings),
            realtime: ConnectionManager::new(),
            publisher,
            mqtt_connected,
            rate_limits,
            calculator: CostCalculator::default(),
            started_at: Utc::now(),
        }
    }

    /// Current broker session state, if the bridge is enabled.
    #[must_use]
    pub fn mqtt_status(&self) -> Option<bool> {
        self.mqtt_connected
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
    }
}
