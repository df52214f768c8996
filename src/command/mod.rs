//! CommandService - Outbound Management Commands
//!
//! ## Responsibilities
//!
//! - Publish management commands to a device's management topic
//! - Administrative device removal (purge + retained config tombstone)
//! - Record a command history entry with the publish outcome
//!
//! Commands are fire-and-forget toward the device: the publish is
//! acknowledged by the broker, never by the device. The device's own
//! acknowledgement arrives later on the message topic and is not
//! correlated back.

use crate::error::{Error, Result};
use crate::fleet_store::FleetStore;
use crate::history::{format_device_time, EventRecord, HistoryService};
use crate::transport::{publish_acknowledged, MqttSettings};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// Command event published when the administrative removal runs
const REMOVAL_COMMAND: &str = "mac-info-delete";

/// Result of a command publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Fail,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOutcome::Success => "success",
            CommandOutcome::Fail => "fail",
        }
    }
}

/// CommandService instance
pub struct CommandService {
    fleet: Arc<FleetStore>,
    history: Arc<HistoryService>,
    settings: MqttSettings,
}

impl CommandService {
    /// Create new service
    pub fn new(fleet: Arc<FleetStore>, history: Arc<HistoryService>, settings: MqttSettings) -> Self {
        Self {
            fleet,
            history,
            settings,
        }
    }

    /// Publish one management command (`open-door`, `call-response`, ...)
    /// to the device and record the outcome. Publish failure surfaces as
    /// a `Fail` outcome, never as a retry.
    pub async fn send_command(&self, mac: &str, event: &str) -> CommandOutcome {
        let now = Utc::now();
        let payload = json!({
            "time": format_device_time(now),
            "event": event,
            "status": "success",
        });

        let outcome = match publish_acknowledged(
            &self.settings,
            "tower-command",
            &self.settings.device_topic(mac, "management"),
            payload.to_string().into_bytes(),
            false,
        )
        .await
        {
            Ok(()) => {
                tracing::info!(mac = %mac, event = %event, "Command sent");
                CommandOutcome::Success
            }
            Err(e) => {
                tracing::error!(mac = %mac, event = %event, error = %e, "Command publish failed");
                CommandOutcome::Fail
            }
        };

        self.history
            .record(EventRecord::command(now, mac, event, outcome.as_str()))
            .await;
        outcome
    }

    /// Administrative removal: purge the device from fleet and heartbeat
    /// maps, then leave a retained tombstone on its config topic so the
    /// broker stops replaying the old configuration.
    pub async fn remove_device(&self, mac: &str) -> Result<()> {
        let now = Utc::now();

        if !self.fleet.contains(mac).await {
            self.history
                .record(EventRecord::command(now, mac, REMOVAL_COMMAND, "fail"))
                .await;
            return Err(Error::NotFound(format!("door phone {mac} is not registered")));
        }

        self.fleet.purge(mac).await;
        tracing::info!(mac = %mac, "Device purged from fleet state");

        let tombstone = serde_json::to_vec("")?;
        let published = publish_acknowledged(
            &self.settings,
            "tower-command",
            &self.settings.device_topic(mac, "config"),
            tombstone,
            true,
        )
        .await;

        match published {
            Ok(()) => {
                tracing::info!(mac = %mac, "Config tombstone published");
                self.history
                    .record(EventRecord::command(now, mac, REMOVAL_COMMAND, "success"))
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(mac = %mac, error = %e, "Tombstone publish failed");
                self.history
                    .record(EventRecord::command(now, mac, REMOVAL_COMMAND, "fail"))
                    .await;
                Err(e)
            }
        }
    }
}
