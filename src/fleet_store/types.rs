//! Fleet store types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device configuration as announced on the config topic.
///
/// Three fields carry identity semantics (`location`, `apartments`,
/// `allowed_keys`); everything else the device sends is kept verbatim in
/// `extra` and replaced wholesale on reconfiguration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub apartments: Vec<Value>,
    #[serde(default)]
    pub allowed_keys: Vec<Value>,
    /// Device-specific fields outside the known set
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceConfig {
    /// Semantic equality over the known fields only.
    ///
    /// `active`/`error` are reconciliation-owned and never part of the
    /// configuration; `extra` is deliberately excluded so a device that
    /// re-announces itself with jittery auxiliary fields still counts as
    /// a reconnect.
    pub fn same_fleet_identity(&self, other: &DeviceConfig) -> bool {
        self.location == other.location
            && self.apartments == other.apartments
            && self.allowed_keys == other.allowed_keys
    }
}

/// Current record for one door phone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorPhone {
    #[serde(flatten)]
    pub config: DeviceConfig,
    /// Device is currently announced/alive
    pub active: bool,
    /// Device was demoted by a liveness failure
    pub error: bool,
}

impl DoorPhone {
    pub fn online(config: DeviceConfig) -> Self {
        Self {
            config,
            active: true,
            error: false,
        }
    }
}

/// Outcome of a fleet upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Identity never seen before, record created
    Registered,
    /// Known identity, configuration replaced
    Reconfigured,
    /// Known identity re-announced an identical configuration
    Reconnected,
}
