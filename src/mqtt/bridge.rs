//! Broker connection: subscribes to device topics and feeds the dispatcher.

use crate::{
    config::settings::{MqttSettings, parse_broker_url},
    errors::{Error, Result},
    mqtt::{CommandPublisher, DispatchOutcome, Dispatcher, subscription},
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requests buffered between the client handle and the event loop.
const CHANNEL_CAPACITY: usize = 64;

/// Builds the client handle and its event loop from settings.
pub fn connect(settings: &MqttSettings) -> Result<(AsyncClient, EventLoop)> {
    let (host, port) = parse_broker_url(&settings.broker_url)?;
    let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    Ok(AsyncClient::new(options, CHANNEL_CAPACITY))
}

/// Publishes device commands through a live broker connection.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    #[must_use]
    pub const fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Mqtt {
                message: format!("publish to {topic} failed: {e}"),
            })
    }
}

/// Drives the event loop forever, reconnecting after `reconnect_delay` on errors.
///
/// `connected` mirrors the broker session state for the health report.
pub async fn run(
    client: AsyncClient,
    mut event_loop: EventLoop,
    dispatcher: Dispatcher,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    let filter = subscription(dispatcher.prefix());
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                info!(filter = %filter, "connected to MQTT broker");
                if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                    error!("MQTT subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    match dispatcher.dispatch(&publish.topic, &publish.payload).await {
                        Ok(DispatchOutcome::Ignored { reason }) => {
                            debug!(topic = %publish.topic, reason, "MQTT message ignored");
                        }
                        Ok(DispatchOutcome::Handled { .. }) => {}
                        Err(e) => warn!(topic = %publish.topic, "MQTT message failed: {e}"),
                    }
                });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                warn!("MQTT broker closed the session");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("disconnected from MQTT broker: {e}");
                } else {
                    debug!("MQTT connection attempt failed: {e}");
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
