//! Application state
//!
//! Holds all shared components and configuration

use crate::call_tracker::CallTracker;
use crate::command::CommandService;
use crate::fleet_store::FleetStore;
use crate::history::HistoryService;
use crate::transport::MqttSettings;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// MQTT broker host
    pub mqtt_host: String,
    /// MQTT broker port
    pub mqtt_port: u16,
    /// Topic namespace (first path segment)
    pub namespace: String,
    /// HTTP server host
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// Heartbeat silence threshold and sweep period, seconds
    pub heartbeat_timeout_secs: u64,
    /// Event history ring capacity
    pub history_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt_host: std::env::var("MQTT_HOST").unwrap_or_else(|_| "mqtt".to_string()),
            mqtt_port: std::env::var("MQTT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1883),
            namespace: std::env::var("TOPIC_NAMESPACE").unwrap_or_else(|_| "intercom".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8001),
            heartbeat_timeout_secs: std::env::var("HEARTBEAT_TIMEOUT_SEC")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(12),
            history_capacity: std::env::var("HISTORY_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(2000),
        }
    }
}

impl AppConfig {
    /// Broker settings derived from this configuration
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            namespace: self.namespace.clone(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Fleet state store (devices + heartbeats)
    pub fleet: Arc<FleetStore>,
    /// Open call sessions
    pub calls: Arc<CallTracker>,
    /// Event history sink
    pub history: Arc<HistoryService>,
    /// Outbound command dispatch
    pub commands: Arc<CommandService>,
}
