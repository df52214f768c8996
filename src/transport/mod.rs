//! Transport - MQTT Broker Plumbing
//!
//! ## Responsibilities
//!
//! - Broker connection settings and topic construction
//! - Acknowledged QoS-1 publish on a short-lived connection
//! - Reconnect backoff policy for the subscription loops
//!
//! The broker is an external collaborator: at-least-once delivery, no
//! ordering across topics. Everything above this module works with decoded
//! payloads and never sees a raw connection.

use crate::error::{Error, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;

/// How long an acknowledged publish waits for its PubAck
const PUBLISH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// First topic path segment, `intercom` in production
    pub namespace: String,
}

impl MqttSettings {
    /// Wildcard subscription filter for one channel, `<ns>/+/<channel>`
    pub fn subscription_filter(&self, channel: &str) -> String {
        format!("{}/+/{}", self.namespace, channel)
    }

    /// Concrete topic for one device, `<ns>/<mac>/<channel>`
    pub fn device_topic(&self, mac: &str, channel: &str) -> String {
        format!("{}/{}/{}", self.namespace, mac, channel)
    }

    /// Open a broker connection
    pub fn connect(&self, client_id: &str) -> (AsyncClient, EventLoop) {
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        AsyncClient::new(options, 64)
    }
}

/// Publish one message at QoS 1 and wait for the broker's acknowledgement.
///
/// Uses a short-lived connection per publish, mirroring how commands are
/// sent: rare, caller-triggered, and never holding fleet-state locks
/// while the broker round-trip is in flight.
pub async fn publish_acknowledged(
    settings: &MqttSettings,
    client_id: &str,
    topic: &str,
    payload: Vec<u8>,
    retain: bool,
) -> Result<()> {
    let (client, mut eventloop) = settings.connect(client_id);

    client
        .publish(topic, QoS::AtLeastOnce, retain, payload)
        .await
        .map_err(|e| Error::Transport(format!("publish to {topic}: {e}")))?;

    let acked = tokio::time::timeout(PUBLISH_ACK_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(Error::Transport(format!("broker connection: {e}"))),
            }
        }
    })
    .await;

    let _ = client.disconnect().await;

    match acked {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(format!("publish to {topic}: ack timeout"))),
    }
}

/// Bounded exponential reconnect backoff.
///
/// The reference behavior retried a dropped subscription in a tight loop;
/// this caps the retry rate without ever giving up.
#[derive(Debug)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl ReconnectBackoff {
    const INITIAL: Duration = Duration::from_millis(500);
    const CEILING: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Delay to sleep before the next attempt; doubles up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::CEILING);
        delay
    }

    /// Call after a successful connect
    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            host: "mqtt".to_string(),
            port: 1883,
            namespace: "intercom".to_string(),
        }
    }

    #[test]
    fn test_topic_construction() {
        let s = settings();
        assert_eq!(s.subscription_filter("config"), "intercom/+/config");
        assert_eq!(
            s.device_topic("AA:BB:CC:DD:EE:FF", "management"),
            "intercom/AA:BB:CC:DD:EE:FF/management"
        );
    }

    #[test]
    fn test_backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = ReconnectBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));

        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
