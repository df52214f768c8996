//! HistoryService - Append-Only Event History
//!
//! ## Responsibilities
//!
//! - Normalized event records (config / message / life / command)
//! - Bounded in-memory ring buffer of recorded events
//! - Filtered queries (identity, kind, relative time window)
//!
//! Recording is best-effort from the ingestion pipeline's perspective;
//! nothing here ever feeds back into the transport. Records carry the
//! device-declared timestamp, not ingestion time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Wall-clock format the devices use in every declared timestamp
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a device-declared timestamp, interpreted as UTC
pub fn parse_device_time(raw: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, DEVICE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a timestamp in the devices' wall-clock format
pub fn format_device_time(time: DateTime<Utc>) -> String {
    time.format(DEVICE_TIME_FORMAT).to_string()
}

/// Record category, mirrors the inbound topics plus outbound commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Config,
    Message,
    Life,
    Command,
}

impl EventKind {
    /// Parse the query-string form
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "config" => Some(Self::Config),
            "message" => Some(Self::Message),
            "life" => Some(Self::Life),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

/// Kind-specific record fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventBody {
    Config {
        event: String,
        new_config: Option<Value>,
        old_config: Option<Value>,
    },
    Message {
        event: String,
        status: Option<String>,
        door_status: Option<String>,
        reason: Option<String>,
        key: Option<Value>,
        result: Option<String>,
        apartment: Option<String>,
        location: Option<String>,
    },
    Life {
        status: String,
    },
    Command {
        event: String,
        status: String,
    },
}

/// One normalized, immutable history entry
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub record_id: u64,
    pub kind: EventKind,
    /// Device-declared time (ingestion time only as a config fallback)
    pub time: DateTime<Utc>,
    pub mac: String,
    #[serde(flatten)]
    pub body: EventBody,
}

impl EventRecord {
    pub fn config(time: DateTime<Utc>, mac: &str, event: &str, new_config: Option<Value>, old_config: Option<Value>) -> Self {
        Self {
            record_id: 0,
            kind: EventKind::Config,
            time,
            mac: mac.to_string(),
            body: EventBody::Config {
                event: event.to_string(),
                new_config,
                old_config,
            },
        }
    }

    pub fn life(time: DateTime<Utc>, mac: &str, status: &str) -> Self {
        Self {
            record_id: 0,
            kind: EventKind::Life,
            time,
            mac: mac.to_string(),
            body: EventBody::Life {
                status: status.to_string(),
            },
        }
    }

    pub fn command(time: DateTime<Utc>, mac: &str, event: &str, status: &str) -> Self {
        Self {
            record_id: 0,
            kind: EventKind::Command,
            time,
            mac: mac.to_string(),
            body: EventBody::Command {
                event: event.to_string(),
                status: status.to_string(),
            },
        }
    }
}

/// Relative query window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    All,
    LastMinute,
    LastTenMinutes,
    LastHour,
    LastDay,
}

impl HistoryWindow {
    /// Parse the query-string form (`all|1m|10m|1h|24h`)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all" => Some(Self::All),
            "1m" => Some(Self::LastMinute),
            "10m" => Some(Self::LastTenMinutes),
            "1h" => Some(Self::LastHour),
            "24h" => Some(Self::LastDay),
            _ => None,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            Self::All => return None,
            Self::LastMinute => Duration::minutes(1),
            Self::LastTenMinutes => Duration::minutes(10),
            Self::LastHour => Duration::hours(1),
            Self::LastDay => Duration::hours(24),
        };
        Some(now - span)
    }
}

/// Query filter, all dimensions optional
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub mac: Option<String>,
    pub kind: Option<EventKind>,
    pub window: Option<HistoryWindow>,
}

struct HistoryRing {
    records: VecDeque<EventRecord>,
    capacity: usize,
    next_id: u64,
}

impl HistoryRing {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, mut record: EventRecord) -> u64 {
        record.record_id = self.next_id;
        self.next_id += 1;

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.next_id - 1
    }
}

/// HistoryService instance
pub struct HistoryService {
    ring: RwLock<HistoryRing>,
}

impl HistoryService {
    /// Create with a bounded capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(HistoryRing::new(capacity)),
        }
    }

    /// Append one record
    pub async fn record(&self, record: EventRecord) -> u64 {
        let mut ring = self.ring.write().await;
        let id = ring.push(record);
        tracing::debug!(record_id = id, "Event recorded to history");
        id
    }

    /// Newest-first records matching the filter
    pub async fn query(&self, filter: &HistoryFilter) -> Vec<EventRecord> {
        let cutoff = filter.window.and_then(|w| w.cutoff(Utc::now()));
        let ring = self.ring.read().await;
        ring.records
            .iter()
            .rev()
            .filter(|r| filter.mac.as_deref().map_or(true, |mac| r.mac == mac))
            .filter(|r| filter.kind.map_or(true, |kind| r.kind == kind))
            .filter(|r| cutoff.map_or(true, |c| r.time >= c))
            .cloned()
            .collect()
    }

    /// Total records currently retained
    pub async fn count(&self) -> usize {
        self.ring.read().await.records.len()
    }
}

impl Default for HistoryService {
    fn default() -> Self {
        Self::new(2000)
    }
}
