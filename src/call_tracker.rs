//! Call Session Tracker
//!
//! Tracks in-progress call sessions keyed by device identity. At most one
//! open session per identity; a second call-start overwrites the previous
//! session (hardware resets mid-call look exactly like this), and a
//! call-end without an open session is a benign no-op.
//!
//! The tracker has no dependency on the fleet store; whether a calling
//! device is registered is the ingestion boundary's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One in-progress call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Device-declared start time
    pub time: DateTime<Utc>,
    /// Apartment/unit being called
    pub apartment: Option<String>,
    /// Device location at call time
    pub location: Option<String>,
}

/// Tracks open call sessions
pub struct CallTracker {
    sessions: RwLock<HashMap<String, CallSession>>,
}

impl CallTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or overwrite) the session for an identity
    pub async fn on_call_start(
        &self,
        mac: &str,
        time: DateTime<Utc>,
        apartment: Option<String>,
        location: Option<String>,
    ) {
        let mut sessions = self.sessions.write().await;
        let session = CallSession {
            time,
            apartment,
            location,
        };
        if let Some(previous) = sessions.insert(mac.to_string(), session) {
            tracing::warn!(
                mac = %mac,
                previous_start = %previous.time,
                "Call started with a session already open, overwriting"
            );
        } else {
            tracing::info!(mac = %mac, "Call started");
        }
    }

    /// Close the session for an identity; absent session is a no-op
    pub async fn on_call_end(&self, mac: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(mac).is_some() {
            tracing::info!(mac = %mac, "Call ended");
        } else {
            tracing::debug!(mac = %mac, "Call end with no open session, ignoring");
        }
    }

    /// Point-in-time view of all open sessions
    pub async fn snapshot(&self) -> HashMap<String, CallSession> {
        self.sessions.read().await.clone()
    }

    /// Number of open sessions
    pub async fn open_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}
