//! MQTT transport
//!
//! Owns the broker connection and turns every incoming publish into a
//! [`RawMessage`] on a bounded channel. Connection, authentication and
//! keep-alive are handled by `rumqttc`; this module only subscribes and
//! forwards. There is no reconnect: losing the broker is fatal.

use std::time::Duration;

use relay_common::RawMessage;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "mqtt-listener";

/// Capacity of rumqttc's internal request queue
const REQUEST_CAPACITY: usize = 64;

/// How long shutdown waits for DISCONNECT to reach the broker
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection settings
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttTransport {
    /// Build the client. No network I/O happens until [`MqttTransport::run`].
    pub fn new(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_credentials(&settings.username, &settings.password);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self { client, eventloop }
    }

    /// Register interest in `topics`.
    ///
    /// All topics go out in one SUBSCRIBE at QoS 0: delivery is at most once
    /// and nothing is acknowledged back to the broker.
    pub async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));

        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        info!(topics = ?topics, "subscription requested");
        Ok(())
    }

    /// Drive the connection, forwarding publishes into `tx`.
    ///
    /// Returns `Ok` on shutdown or once the receiving side is gone, and `Err`
    /// when the connection fails or the broker rejects a subscription.
    /// Forwarding waits for channel capacity, so a saturated pipeline slows
    /// reading from the broker rather than dropping messages here.
    #[instrument(name = "mqtt_transport", skip_all)]
    pub async fn run(
        mut self,
        tx: mpsc::Sender<RawMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shutdown signal received");
                    self.disconnect().await;
                    return Ok(());
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if tx.send(to_raw_message(publish)).await.is_err() {
                                debug!("dispatcher gone, stopping transport");
                                self.disconnect().await;
                                return Ok(());
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!(code = ?ack.code, "listener is connected to MQTT broker");
                        }
                        Ok(Event::Incoming(Packet::SubAck(ack))) => {
                            let rejected = ack
                                .return_codes
                                .iter()
                                .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                                .count();
                            if rejected > 0 {
                                return Err(TransportError::Subscribe(format!(
                                    "broker rejected {} of {} topic filters",
                                    rejected,
                                    ack.return_codes.len()
                                )));
                            }
                            debug!("subscription acknowledged");
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            warn!("broker sent disconnect");
                            return Err(TransportError::Connection(
                                "broker closed the session".to_string(),
                            ));
                        }
                        Ok(_) => {
                            // Pings and outgoing traffic
                        }
                        Err(e) => {
                            return Err(TransportError::Connection(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}

impl MqttTransport {
    /// Send DISCONNECT and keep the event loop going until it is on the wire.
    ///
    /// Gives up after [`DISCONNECT_TIMEOUT`] or on the first connection error;
    /// the session is being torn down either way.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "could not queue disconnect");
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => {},
                    Err(e) => {
                        debug!(error = %e, "connection closed before disconnect was sent");
                        return false;
                    },
                }
            }
        })
        .await;

        match flushed {
            Ok(true) => info!("disconnected from MQTT broker"),
            Ok(false) => {},
            Err(_) => warn!("timed out sending disconnect to MQTT broker"),
        }
    }
}

fn to_raw_message(publish: Publish) -> RawMessage {
    RawMessage {
        topic: publish.topic,
        payload: publish.payload,
    }
}

/// Split a broker address into host and port.
///
/// Accepts `mqtt://host:port`, `tcp://host:port`, `host:port` or a bare
/// `host`, which gets `default_port`.
pub fn parse_broker_url(url: &str, default_port: u16) -> Result<(String, u16), TransportError> {
    let trimmed = url.trim();
    let address = trimmed
        .strip_prefix("mqtt://")
        .or_else(|| trimmed.strip_prefix("tcp://"))
        .unwrap_or(trimmed);

    let parts: Vec<&str> = address.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((host.to_string(), default_port)),
        [host, port] if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                TransportError::InvalidBrokerUrl(format!("invalid port in '{}'", url))
            })?;
            Ok((host.to_string(), port))
        },
        _ => Err(TransportError::InvalidBrokerUrl(url.to_string())),
    }
}
