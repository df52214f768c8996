//! Ingest - Event Ingestion Pipeline
//!
//! ## Responsibilities
//!
//! - Three long-lived subscriptions (config / message / life topics)
//! - Topic parsing and device-identity validation
//! - Payload decoding and routing to reconcile / call tracker / fleet store
//! - Forwarding normalized records to the history sink
//!
//! A malformed message is dropped and logged; it never aborts the
//! subscription. A dropped broker connection is retried forever with
//! bounded backoff.

use crate::call_tracker::CallTracker;
use crate::error::{Error, Result};
use crate::fleet_store::FleetStore;
use crate::history::{parse_device_time, EventBody, EventKind, EventRecord, HistoryService};
use crate::reconcile::{ConfigEventPayload, ReconcileEngine};
use crate::transport::{MqttSettings, ReconnectBackoff};
use chrono::Utc;
use rumqttc::{Event, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Fixed length of a device identity (colon-separated MAC address)
pub const DEVICE_IDENTITY_LEN: usize = 17;

/// Inbound payload on `<ns>/{mac}/message`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceMessagePayload {
    pub time: String,
    pub event: String,
    pub status: String,
    pub door_status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub key: Option<Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub apartment: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Inbound payload on `<ns>/{mac}/life`
#[derive(Debug, Clone, Deserialize)]
pub struct LifeEventPayload {
    pub time: String,
    /// `"deleted"` is the decommission sentinel; anything else means alive
    pub status: String,
}

/// Extract and validate the device identity from a topic path.
/// Identity is the second segment: `<ns>/<mac>/<channel>`.
pub fn device_identity(topic: &str) -> Result<&str> {
    let mac = topic
        .split('/')
        .nth(1)
        .ok_or_else(|| Error::Validation(format!("topic has no identity segment: {topic}")))?;
    if mac.len() != DEVICE_IDENTITY_LEN {
        return Err(Error::Validation(format!("bad device identity in topic: {topic}")));
    }
    Ok(mac)
}

/// Subscription channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Config,
    Message,
    Life,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Config => "config",
            Channel::Message => "message",
            Channel::Life => "life",
        }
    }
}

/// IngestPipeline instance: per-message decision logic shared by the
/// three subscription loops
pub struct IngestPipeline {
    fleet: Arc<FleetStore>,
    calls: Arc<CallTracker>,
    reconcile: Arc<ReconcileEngine>,
    history: Arc<HistoryService>,
}

impl IngestPipeline {
    /// Create new pipeline
    pub fn new(
        fleet: Arc<FleetStore>,
        calls: Arc<CallTracker>,
        reconcile: Arc<ReconcileEngine>,
        history: Arc<HistoryService>,
    ) -> Self {
        Self {
            fleet,
            calls,
            reconcile,
            history,
        }
    }

    /// Handle one message from the config topic
    pub async fn handle_config(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mac = device_identity(topic)?;

        if payload.is_empty() {
            tracing::debug!(mac = %mac, "Empty retained config payload, ignoring");
            return Ok(());
        }
        let raw: Value = serde_json::from_slice(payload)?;
        if matches!(&raw, Value::Null) || matches!(&raw, Value::String(s) if s.is_empty()) {
            // Tombstone left by an administrative removal
            tracing::debug!(mac = %mac, "Config tombstone, ignoring");
            return Ok(());
        }

        let event: ConfigEventPayload = serde_json::from_value(raw)?;
        let outcome = self.reconcile.apply(mac, &event, Utc::now()).await?;
        self.history.record(outcome.record).await;
        Ok(())
    }

    /// Handle one message from the message topic (door events, calls)
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mac = device_identity(topic)?;
        let message: DeviceMessagePayload = serde_json::from_slice(payload)?;
        let time = parse_device_time(&message.time)
            .ok_or_else(|| Error::Decode(format!("bad message time: {}", message.time)))?;

        match message.event.as_str() {
            "call-start" | "call-end" => {
                if self.fleet.contains(mac).await {
                    if message.event == "call-start" {
                        self.calls
                            .on_call_start(
                                mac,
                                time,
                                message.apartment.clone(),
                                message.location.clone(),
                            )
                            .await;
                    } else {
                        self.calls.on_call_end(mac).await;
                    }
                } else {
                    tracing::warn!(mac = %mac, event = %message.event, "Call event from unregistered device");
                }
            }
            _ => {}
        }

        self.history
            .record(EventRecord {
                record_id: 0,
                kind: EventKind::Message,
                time,
                mac: mac.to_string(),
                body: EventBody::Message {
                    event: message.event,
                    status: Some(message.status),
                    door_status: Some(message.door_status),
                    reason: message.reason,
                    key: message.key,
                    result: message.result,
                    apartment: message.apartment,
                    location: message.location,
                },
            })
            .await;
        Ok(())
    }

    /// Handle one message from the life topic (heartbeats)
    pub async fn handle_life(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mac = device_identity(topic)?;
        let life: LifeEventPayload = serde_json::from_slice(payload)?;
        let time = parse_device_time(&life.time)
            .ok_or_else(|| Error::Decode(format!("bad life time: {}", life.time)))?;

        if life.status == "deleted" {
            if self.fleet.forget_heartbeat(mac).await {
                tracing::info!(mac = %mac, "Device decommissioned, heartbeat tracking dropped");
            }
        } else {
            // Observation time, not the declared one: timeout detection
            // measures our silence, not the device's clock.
            self.fleet.record_heartbeat(mac, Utc::now()).await;
            tracing::debug!(mac = %mac, "Heartbeat observed");
        }

        self.history
            .record(EventRecord::life(time, mac, &life.status))
            .await;
        Ok(())
    }

    async fn dispatch(&self, channel: Channel, topic: &str, payload: &[u8]) -> Result<()> {
        match channel {
            Channel::Config => self.handle_config(topic, payload).await,
            Channel::Message => self.handle_message(topic, payload).await,
            Channel::Life => self.handle_life(topic, payload).await,
        }
    }
}

/// One supervised subscription loop. Runs until the task is aborted:
/// message-level failures are logged and skipped, connection-level
/// failures trigger resubscription with bounded backoff.
pub async fn run_subscription(
    pipeline: Arc<IngestPipeline>,
    settings: MqttSettings,
    channel: Channel,
) {
    let filter = settings.subscription_filter(channel.name());
    let client_id = format!("tower-{}", channel.name());
    let mut backoff = ReconnectBackoff::new();

    loop {
        let (client, mut eventloop) = settings.connect(&client_id);
        if let Err(e) = client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
            tracing::error!(filter = %filter, error = %e, "Subscribe request failed");
            tokio::time::sleep(backoff.next_delay()).await;
            continue;
        }
        tracing::info!(filter = %filter, "Listening for {} events", channel.name());

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!(filter = %filter, "Connected to MQTT broker");
                    backoff.reset();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(e) = pipeline
                        .dispatch(channel, &publish.topic, &publish.payload)
                        .await
                    {
                        tracing::error!(
                            topic = %publish.topic,
                            error = %e,
                            "Failed to process message, dropping"
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(filter = %filter, error = %e, "Broker connection lost");
                    tokio::time::sleep(backoff.next_delay()).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryFilter;
    use serde_json::json;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn pipeline() -> (Arc<FleetStore>, Arc<CallTracker>, Arc<HistoryService>, IngestPipeline) {
        let fleet = Arc::new(FleetStore::new());
        let calls = Arc::new(CallTracker::new());
        let history = Arc::new(HistoryService::new(100));
        let reconcile = Arc::new(ReconcileEngine::new(fleet.clone()));
        let pipeline = IngestPipeline::new(fleet.clone(), calls.clone(), reconcile, history.clone());
        (fleet, calls, history, pipeline)
    }

    fn topic(channel: &str) -> String {
        format!("intercom/{MAC}/{channel}")
    }

    #[test]
    fn test_device_identity_extraction() {
        assert_eq!(device_identity("intercom/AA:BB:CC:DD:EE:FF/config").unwrap(), MAC);
        assert!(device_identity("intercom").is_err());
        assert!(device_identity("intercom/short/config").is_err());
    }

    #[tokio::test]
    async fn test_config_added_registers_device() {
        let (fleet, _, history, pipeline) = pipeline();
        let payload = json!({
            "time": "2026-08-23 10:00:00",
            "event": "added",
            "new_config": {"location": "Hall", "apartments": [101], "allowed_keys": [7]}
        });

        pipeline
            .handle_config(&topic("config"), payload.to_string().as_bytes())
            .await
            .unwrap();

        assert!(fleet.get(MAC).await.unwrap().active);
        assert_eq!(history.count().await, 1);
    }

    #[tokio::test]
    async fn test_config_tombstone_is_ignored() {
        let (fleet, _, history, pipeline) = pipeline();
        pipeline
            .handle_config(&topic("config"), b"\"\"")
            .await
            .unwrap();
        pipeline.handle_config(&topic("config"), b"").await.unwrap();

        assert!(!fleet.contains(MAC).await);
        assert_eq!(history.count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_config_is_an_error_not_a_panic() {
        let (_, _, history, pipeline) = pipeline();
        assert!(pipeline
            .handle_config(&topic("config"), b"{not json")
            .await
            .is_err());
        assert_eq!(history.count().await, 0);
    }

    #[tokio::test]
    async fn test_call_start_and_end_flow() {
        let (fleet, calls, history, pipeline) = pipeline();
        fleet.upsert(MAC, Default::default()).await;

        let start = json!({
            "time": "2026-08-23 10:00:00",
            "event": "call-start",
            "status": "ringing",
            "door_status": "closed",
            "apartment": "5",
            "location": "L1"
        });
        pipeline
            .handle_message(&topic("message"), start.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(calls.open_count().await, 1);

        let end = json!({
            "time": "2026-08-23 10:00:30",
            "event": "call-end",
            "status": "done",
            "door_status": "closed"
        });
        pipeline
            .handle_message(&topic("message"), end.to_string().as_bytes())
            .await
            .unwrap();
        assert!(calls.snapshot().await.is_empty());

        let messages = history
            .query(&HistoryFilter {
                mac: Some(MAC.to_string()),
                kind: Some(EventKind::Message),
                window: None,
            })
            .await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_call_from_unregistered_device_is_recorded_but_not_tracked() {
        let (_, calls, history, pipeline) = pipeline();
        let start = json!({
            "time": "2026-08-23 10:00:00",
            "event": "call-start",
            "status": "ringing",
            "door_status": "closed"
        });

        pipeline
            .handle_message(&topic("message"), start.to_string().as_bytes())
            .await
            .unwrap();

        assert_eq!(calls.open_count().await, 0);
        assert_eq!(history.count().await, 1);
    }

    #[tokio::test]
    async fn test_life_updates_heartbeat() {
        let (fleet, _, history, pipeline) = pipeline();
        let life = json!({"time": "2026-08-23 10:00:00", "status": "alive"});

        pipeline
            .handle_life(&topic("life"), life.to_string().as_bytes())
            .await
            .unwrap();

        assert!(fleet.last_heartbeat(MAC).await.is_some());
        assert_eq!(history.count().await, 1);
    }

    #[tokio::test]
    async fn test_life_deleted_drops_heartbeat_but_not_record() {
        let (fleet, _, _, pipeline) = pipeline();
        fleet.upsert(MAC, Default::default()).await;
        fleet.record_heartbeat(MAC, Utc::now()).await;

        let deleted = json!({"time": "2026-08-23 10:00:00", "status": "deleted"});
        pipeline
            .handle_life(&topic("life"), deleted.to_string().as_bytes())
            .await
            .unwrap();

        assert!(fleet.last_heartbeat(MAC).await.is_none());
        assert!(fleet.contains(MAC).await);
    }

    #[tokio::test]
    async fn test_message_with_bad_time_is_dropped() {
        let (_, _, history, pipeline) = pipeline();
        let bad = json!({
            "time": "yesterday",
            "event": "door-open",
            "status": "ok",
            "door_status": "open"
        });

        assert!(pipeline
            .handle_message(&topic("message"), bad.to_string().as_bytes())
            .await
            .is_err());
        assert_eq!(history.count().await, 0);
    }
}
