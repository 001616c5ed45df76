//! Control-channel wire messages
//!
//! JSON, internally tagged on `type`, field names camelCase. Shapes are
//! kept stable for the existing front end.

use serde::{Deserialize, Serialize};
use surge_core::{DriverDescriptor, LogEntry, TelemetrySnapshot};

fn default_duration() -> u64 {
    60
}

fn default_packet_delay() -> u64 {
    500
}

fn default_packet_size() -> usize {
    64
}

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    StartAttack {
        target: String,
        attack_method: String,
        /// Seconds
        #[serde(default = "default_duration")]
        duration: u64,
        /// Milliseconds between ticks
        #[serde(default = "default_packet_delay")]
        packet_delay: u64,
        /// Bytes of random payload per attempt
        #[serde(default = "default_packet_size")]
        packet_size: usize,
    },
    StopAttack,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Stats {
        timestamp: chrono::DateTime<chrono::Utc>,
        pps: u64,
        total_packets: u64,
        relays: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        log: Option<LogEntry>,
    },
    AttackEnd,
    #[serde(rename_all = "camelCase")]
    AttackError { message: String },
}

impl From<TelemetrySnapshot> for ServerMessage {
    fn from(snapshot: TelemetrySnapshot) -> Self {
        ServerMessage::Stats {
            timestamp: snapshot.timestamp,
            pps: snapshot.pps,
            total_packets: snapshot.total,
            relays: snapshot.relays,
            log: snapshot.log,
        }
    }
}

impl ServerMessage {
    /// Synthetic snapshot outside any worker (greetings, start notices).
    pub fn notice(relays: usize, log: LogEntry) -> Self {
        ServerMessage::Stats {
            timestamp: chrono::Utc::now(),
            pps: 0,
            total_packets: 0,
            relays,
            log: Some(log),
        }
    }
}

/// Discovery entry for one registered driver.
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub method: String,
    pub name: String,
    pub description: String,
}

impl From<&DriverDescriptor> for MethodInfo {
    fn from(descriptor: &DriverDescriptor) -> Self {
        Self {
            method: descriptor.id.to_string(),
            name: descriptor.name.to_string(),
            description: descriptor.description.to_string(),
        }
    }
}
