//! Intercom Tower
//!
//! Fleet-state tracking for network-attached door phones, reconciled
//! from an at-least-once MQTT event stream.
//!
//! ## Architecture
//!
//! 1. FleetStore - device records + heartbeat timestamps (SSoT)
//! 2. CallTracker - ephemeral call sessions per device
//! 3. ReconcileEngine - config events -> fleet transitions
//! 4. LivenessMonitor - heartbeat timeout sweep
//! 5. IngestPipeline - three supervised topic subscriptions
//! 6. CommandService - outbound management commands + removal
//! 7. HistoryService - append-only normalized event history
//! 8. WebAPI - REST boundary over snapshots and commands
//!
//! ## Design Principles
//!
//! - All shared maps are serialized behind their owning component
//! - Reconciliation is idempotent against at-least-once delivery
//! - Nothing on the ingestion path is fatal to the process

pub mod call_tracker;
pub mod command;
pub mod error;
pub mod fleet_store;
pub mod history;
pub mod ingest;
pub mod liveness;
pub mod models;
pub mod reconcile;
pub mod state;
pub mod transport;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
