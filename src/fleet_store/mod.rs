//! FleetStore - Fleet State + Heartbeat Timestamps
//!
//! ## Responsibilities
//!
//! - Device identity -> current configuration/status records
//! - Device identity -> last observed heartbeat time
//! - Invariant-preserving mutators (upsert / mark_removed / purge)
//!
//! Both maps live behind a single lock so `purge` and `snapshot` are
//! atomic with respect to the subscription tasks and the liveness sweep.
//! The heartbeat map is independent of the device map: the config and
//! life topics race, so presence in one never implies presence in the
//! other.

mod types;

pub use types::{DeviceConfig, DoorPhone, UpsertOutcome};

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct FleetInner {
    devices: HashMap<String, DoorPhone>,
    heartbeats: HashMap<String, DateTime<Utc>>,
}

/// Shared fleet state store
pub struct FleetStore {
    inner: RwLock<FleetInner>,
}

impl FleetStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FleetInner::default()),
        }
    }

    /// Insert or refresh a device from an announced configuration.
    ///
    /// Returns:
    /// - `Registered` for a never-seen identity
    /// - `Reconnected` when the stored configuration is semantically equal
    ///   (flags are reaffirmed, configuration is NOT replaced)
    /// - `Reconfigured` otherwise (configuration replaced wholesale)
    pub async fn upsert(&self, mac: &str, config: DeviceConfig) -> UpsertOutcome {
        let mut inner = self.inner.write().await;
        match inner.devices.entry(mac.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(DoorPhone::online(config));
                UpsertOutcome::Registered
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if record.config.same_fleet_identity(&config) {
                    record.active = true;
                    record.error = false;
                    UpsertOutcome::Reconnected
                } else {
                    *record = DoorPhone::online(config);
                    UpsertOutcome::Reconfigured
                }
            }
        }
    }

    /// Mark a device inactive.
    ///
    /// An unknown identity is first inserted from `fallback` so the
    /// transition always has a target. With `is_failure` the error flag
    /// is set as well.
    pub async fn mark_removed(&self, mac: &str, fallback: Option<DeviceConfig>, is_failure: bool) {
        let mut inner = self.inner.write().await;
        let record = inner
            .devices
            .entry(mac.to_string())
            .or_insert_with(|| DoorPhone::online(fallback.unwrap_or_default()));
        record.active = false;
        if is_failure {
            record.error = true;
        }
    }

    /// Demote a device that went silent.
    ///
    /// Returns `true` only when the record existed and was active, i.e.
    /// exactly once per silence episode. An identity with no record is
    /// left alone (config/life topics race; the heartbeat entry stays so
    /// the device is demoted once its record appears).
    pub async fn fail_if_active(&self, mac: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.devices.get_mut(mac) {
            Some(record) if record.active => {
                record.active = false;
                record.error = true;
                true
            }
            _ => false,
        }
    }

    /// Unconditionally delete a device record and its heartbeat entry.
    /// Administrative removal only; liveness never purges.
    pub async fn purge(&self, mac: &str) -> bool {
        let mut inner = self.inner.write().await;
        let existed = inner.devices.remove(mac).is_some();
        inner.heartbeats.remove(mac);
        existed
    }

    /// Whether the identity currently has a device record
    pub async fn contains(&self, mac: &str) -> bool {
        self.inner.read().await.devices.contains_key(mac)
    }

    /// Clone of one device record
    pub async fn get(&self, mac: &str) -> Option<DoorPhone> {
        self.inner.read().await.devices.get(mac).cloned()
    }

    /// Point-in-time view of all device records
    pub async fn snapshot(&self) -> HashMap<String, DoorPhone> {
        self.inner.read().await.devices.clone()
    }

    /// Number of known devices
    pub async fn device_count(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    /// Record a heartbeat observation
    pub async fn record_heartbeat(&self, mac: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner.heartbeats.insert(mac.to_string(), at);
    }

    /// Drop the heartbeat entry (device decommission signal).
    /// The device record, if any, is untouched.
    pub async fn forget_heartbeat(&self, mac: &str) -> bool {
        self.inner.write().await.heartbeats.remove(mac).is_some()
    }

    /// Last observed heartbeat for one identity
    pub async fn last_heartbeat(&self, mac: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.heartbeats.get(mac).copied()
    }

    /// Identities whose last heartbeat is strictly older than `cutoff`
    pub async fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        self.inner
            .read()
            .await
            .heartbeats
            .iter()
            .filter(|(_, seen)| **seen < cutoff)
            .map(|(mac, seen)| (mac.clone(), *seen))
            .collect()
    }
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn config(location: &str, apartments: &[i64], keys: &[i64]) -> DeviceConfig {
        DeviceConfig {
            location: Some(location.to_string()),
            apartments: apartments.iter().map(|a| json!(a)).collect(),
            allowed_keys: keys.iter().map(|k| json!(k)).collect(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_first_upsert_registers() {
        let store = FleetStore::new();
        let outcome = store.upsert("AA:BB:CC:DD:EE:FF", config("Hall", &[101], &[7])).await;
        assert_eq!(outcome, UpsertOutcome::Registered);

        let record = store.get("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert!(record.active);
        assert!(!record.error);
    }

    #[tokio::test]
    async fn test_identical_upsert_reconnects() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;
        let outcome = store.upsert("m1", config("Hall", &[101], &[7])).await;
        assert_eq!(outcome, UpsertOutcome::Reconnected);

        let record = store.get("m1").await.unwrap();
        assert!(record.active);
        assert!(!record.error);
    }

    #[tokio::test]
    async fn test_reconnect_ignores_extra_fields() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;

        let mut announced = config("Hall", &[101], &[7]);
        announced
            .extra
            .insert("firmware".to_string(), json!("2.1.0"));
        let outcome = store.upsert("m1", announced).await;
        assert_eq!(outcome, UpsertOutcome::Reconnected);
    }

    #[tokio::test]
    async fn test_changed_config_reconfigures() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;
        let outcome = store.upsert("m1", config("Hall", &[101, 102], &[7])).await;
        assert_eq!(outcome, UpsertOutcome::Reconfigured);

        let record = store.get("m1").await.unwrap();
        assert_eq!(record.config.apartments.len(), 2);
        assert!(record.active);
    }

    #[tokio::test]
    async fn test_reconnect_reaffirms_flags_after_failure() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;
        assert!(store.fail_if_active("m1").await);

        let outcome = store.upsert("m1", config("Hall", &[101], &[7])).await;
        assert_eq!(outcome, UpsertOutcome::Reconnected);
        let record = store.get("m1").await.unwrap();
        assert!(record.active);
        assert!(!record.error);
    }

    #[tokio::test]
    async fn test_mark_removed_unknown_creates_from_fallback() {
        let store = FleetStore::new();
        store
            .mark_removed("ghost", Some(config("Yard", &[5], &[])), false)
            .await;

        let record = store.get("ghost").await.unwrap();
        assert!(!record.active);
        assert!(!record.error);
        assert_eq!(record.config.location.as_deref(), Some("Yard"));
    }

    #[tokio::test]
    async fn test_fail_if_active_fires_once() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;
        assert!(store.fail_if_active("m1").await);
        assert!(!store.fail_if_active("m1").await);

        let record = store.get("m1").await.unwrap();
        assert!(!record.active);
        assert!(record.error);
    }

    #[tokio::test]
    async fn test_fail_if_active_unknown_identity_noop() {
        let store = FleetStore::new();
        assert!(!store.fail_if_active("nobody").await);
        assert!(!store.contains("nobody").await);
    }

    #[tokio::test]
    async fn test_purge_clears_both_maps() {
        let store = FleetStore::new();
        store.upsert("m1", config("Hall", &[101], &[7])).await;
        store.record_heartbeat("m1", Utc::now()).await;

        assert!(store.purge("m1").await);
        assert!(store.snapshot().await.is_empty());
        assert!(store.last_heartbeat("m1").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_since_filters_by_cutoff() {
        let store = FleetStore::new();
        let now = Utc::now();
        store.record_heartbeat("old", now - Duration::seconds(30)).await;
        store.record_heartbeat("fresh", now).await;

        let stale = store.stale_since(now - Duration::seconds(12)).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, "old");
    }

    #[tokio::test]
    async fn test_heartbeat_without_record_is_allowed() {
        let store = FleetStore::new();
        store.record_heartbeat("early-bird", Utc::now()).await;
        assert!(!store.contains("early-bird").await);
        assert!(store.last_heartbeat("early-bird").await.is_some());
    }
}
