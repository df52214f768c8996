//! ReconcileEngine - Configuration Event Reconciliation
//!
//! ## Responsibilities
//!
//! - Map a decoded config-topic event onto a fleet-state transition
//! - Produce the normalized history record for the event
//! - Collapse an unchanged re-announcement into a `reconnect` record
//!
//! Devices periodically re-announce an unchanged configuration as a
//! liveness-adjacent signal. Recording every such announcement as a
//! configuration change would flood the history, so an upsert that comes
//! back `Reconnected` overrides the record's event field to `"reconnect"`
//! while still reaffirming the active/error flags.

use crate::error::{Error, Result};
use crate::fleet_store::{DeviceConfig, FleetStore, UpsertOutcome};
use crate::history::{parse_device_time, EventRecord};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Inbound payload on `<ns>/{mac}/config`
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigEventPayload {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub new_config: Option<Value>,
    #[serde(default)]
    pub old_config: Option<Value>,
}

/// Fleet transition an event resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetTransition {
    Registered,
    Reconfigured,
    Reconnected,
    Removed,
}

/// Applied event: the transition taken and the record to append
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub transition: FleetTransition,
    pub record: EventRecord,
}

/// ReconcileEngine instance
pub struct ReconcileEngine {
    fleet: Arc<FleetStore>,
}

impl ReconcileEngine {
    /// Create new engine over the shared fleet store
    pub fn new(fleet: Arc<FleetStore>) -> Self {
        Self { fleet }
    }

    /// Apply one config-topic event.
    ///
    /// `"added"`/`"modified"` with a configuration upsert the device; any
    /// other event kind marks it removed using the declared old
    /// configuration as fallback. `ingested_at` stands in when the device
    /// declared no parseable time.
    pub async fn apply(
        &self,
        mac: &str,
        payload: &ConfigEventPayload,
        ingested_at: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let declared = payload
            .time
            .as_deref()
            .and_then(parse_device_time)
            .unwrap_or(ingested_at);
        let nominal = payload.event.as_deref().unwrap_or("unknown");

        match nominal {
            "added" | "modified" => {
                let raw = payload.new_config.clone().ok_or_else(|| {
                    Error::Decode(format!("{nominal} event without new_config"))
                })?;
                let config: DeviceConfig = serde_json::from_value(raw.clone())?;

                let outcome = self.fleet.upsert(mac, config).await;
                let (transition, recorded_event) = match outcome {
                    UpsertOutcome::Registered => (FleetTransition::Registered, nominal),
                    UpsertOutcome::Reconfigured => (FleetTransition::Reconfigured, nominal),
                    UpsertOutcome::Reconnected => (FleetTransition::Reconnected, "reconnect"),
                };

                if transition == FleetTransition::Reconnected {
                    tracing::info!(mac = %mac, "Device re-announced unchanged config, connection restored");
                } else {
                    tracing::info!(mac = %mac, event = %nominal, "Device added/updated");
                }

                Ok(ReconcileOutcome {
                    transition,
                    record: EventRecord::config(
                        declared,
                        mac,
                        recorded_event,
                        Some(raw),
                        payload.old_config.clone(),
                    ),
                })
            }
            _ => {
                let fallback = payload
                    .old_config
                    .clone()
                    .and_then(|raw| serde_json::from_value(raw).ok());
                self.fleet.mark_removed(mac, fallback, false).await;
                tracing::info!(mac = %mac, event = %nominal, "Device removed");

                Ok(ReconcileOutcome {
                    transition: FleetTransition::Removed,
                    record: EventRecord::config(
                        declared,
                        mac,
                        nominal,
                        payload.new_config.clone(),
                        payload.old_config.clone(),
                    ),
                })
            }
        }
    }
}
