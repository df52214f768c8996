//! LivenessMonitor - Heartbeat Timeout Detection
//!
//! ## Responsibilities
//!
//! - Periodic sweep over the heartbeat timestamp map
//! - Demote devices silent past the threshold (active=false, error=true)
//! - Emit a `life/fail` history record once per silence episode
//!
//! The sweep period equals the detection threshold, so a device silent
//! for strictly more than one threshold interval is flagged within one
//! sweep. The sweep never deletes records and never flips a device back
//! to active; recovery happens only through the reconciliation engine.

use crate::fleet_store::FleetStore;
use crate::history::{EventRecord, HistoryService};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;

/// LivenessMonitor instance
pub struct LivenessMonitor {
    fleet: Arc<FleetStore>,
    history: Arc<HistoryService>,
    /// Detection threshold, also the sweep period
    threshold: Duration,
    running: Arc<RwLock<bool>>,
}

impl LivenessMonitor {
    /// Create new monitor
    pub fn new(fleet: Arc<FleetStore>, history: Arc<HistoryService>, threshold_secs: u64) -> Self {
        Self {
            fleet,
            history,
            threshold: Duration::seconds(threshold_secs as i64),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// One sweep at the given instant. Returns how many devices were
    /// demoted; already-inactive and record-less identities are skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        Self::sweep(&self.fleet, &self.history, self.threshold, now).await
    }

    async fn sweep(
        fleet: &FleetStore,
        history: &HistoryService,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let stale = fleet.stale_since(now - threshold).await;
        let mut demoted = 0;

        for (mac, last_seen) in stale {
            let silent_for = now - last_seen;
            tracing::warn!(
                mac = %mac,
                silent_secs = silent_for.num_seconds(),
                "No life message past threshold"
            );

            if fleet.fail_if_active(&mac).await {
                tracing::info!(mac = %mac, "Device marked failed after heartbeat timeout");
                history.record(EventRecord::life(now, &mac, "fail")).await;
                demoted += 1;
            } else {
                // Already demoted, or the config topic hasn't delivered a
                // record for this identity yet.
                tracing::debug!(mac = %mac, "Stale heartbeat without an active record, skipping");
            }
        }

        demoted
    }

    /// Start the sweep loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Liveness sweep already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            threshold_secs = self.threshold.num_seconds(),
            "Starting liveness monitor"
        );

        let fleet = self.fleet.clone();
        let history = self.history.clone();
        let threshold = self.threshold;
        let running = self.running.clone();

        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(threshold.num_seconds().max(1) as u64);
            let mut ticker = interval(period);
            // First tick completes immediately; skip it so a fresh start
            // doesn't sweep before a single period has elapsed.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                {
                    let is_running = running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                Self::sweep(&fleet, &history, threshold, Utc::now()).await;
            }

            tracing::info!("Liveness monitor stopped");
        });
    }

    /// Stop the sweep loop
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping liveness monitor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet_store::DeviceConfig;
    use crate::history::{EventBody, EventKind, HistoryFilter};

    fn setup(threshold_secs: u64) -> (Arc<FleetStore>, Arc<HistoryService>, LivenessMonitor) {
        let fleet = Arc::new(FleetStore::new());
        let history = Arc::new(HistoryService::new(100));
        let monitor = LivenessMonitor::new(fleet.clone(), history.clone(), threshold_secs);
        (fleet, history, monitor)
    }

    #[tokio::test]
    async fn test_silent_device_is_demoted_with_fail_record() {
        let (fleet, history, monitor) = setup(12);
        let now = Utc::now();

        fleet.upsert("Y", DeviceConfig::default()).await;
        fleet.record_heartbeat("Y", now - Duration::seconds(20)).await;

        assert_eq!(monitor.sweep_at(now).await, 1);

        let record = fleet.get("Y").await.unwrap();
        assert!(!record.active);
        assert!(record.error);

        let fails = history
            .query(&HistoryFilter {
                mac: Some("Y".to_string()),
                kind: Some(EventKind::Life),
                window: None,
            })
            .await;
        assert_eq!(fails.len(), 1);
        assert!(matches!(&fails[0].body, EventBody::Life { status } if status == "fail"));
    }

    #[tokio::test]
    async fn test_second_sweep_emits_nothing() {
        let (fleet, history, monitor) = setup(12);
        let now = Utc::now();

        fleet.upsert("Y", DeviceConfig::default()).await;
        fleet.record_heartbeat("Y", now - Duration::seconds(20)).await;

        assert_eq!(monitor.sweep_at(now).await, 1);
        assert_eq!(monitor.sweep_at(now + Duration::seconds(12)).await, 0);
        assert_eq!(history.count().await, 1);
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_is_untouched() {
        let (fleet, _history, monitor) = setup(12);
        let now = Utc::now();

        fleet.upsert("Y", DeviceConfig::default()).await;
        fleet.record_heartbeat("Y", now - Duration::seconds(5)).await;

        assert_eq!(monitor.sweep_at(now).await, 0);
        assert!(fleet.get("Y").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_heartbeat_without_record_is_skipped_not_dropped() {
        let (fleet, history, monitor) = setup(12);
        let now = Utc::now();

        fleet.record_heartbeat("ghost", now - Duration::seconds(30)).await;

        assert_eq!(monitor.sweep_at(now).await, 0);
        assert_eq!(history.count().await, 0);
        // Entry stays so the device fails on the first sweep after its
        // record shows up.
        assert!(fleet.last_heartbeat("ghost").await.is_some());

        fleet.upsert("ghost", DeviceConfig::default()).await;
        assert_eq!(monitor.sweep_at(now + Duration::seconds(12)).await, 1);
    }

    #[tokio::test]
    async fn test_recovery_path_via_upsert_after_failure() {
        let (fleet, _history, monitor) = setup(12);
        let now = Utc::now();

        fleet.upsert("Y", DeviceConfig::default()).await;
        fleet.record_heartbeat("Y", now - Duration::seconds(20)).await;
        monitor.sweep_at(now).await;

        // A later heartbeat alone does not reactivate the device...
        fleet.record_heartbeat("Y", now + Duration::seconds(1)).await;
        assert!(!fleet.get("Y").await.unwrap().active);

        // ...a config re-announcement does.
        fleet.upsert("Y", DeviceConfig::default()).await;
        assert!(fleet.get("Y").await.unwrap().active);
        assert!(!fleet.get("Y").await.unwrap().error);
    }
}
