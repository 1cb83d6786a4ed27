//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable — it defines the wire format.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    // host RAM share, None when the process is not visible to us
    pub ram_percent: Option<f64>,
    pub gpu_mem_mb: Option<u64>,
}

/// One telemetry snapshot. Unknown or garbled numeric readings are `None`
/// (serialized as `null`); strings are passed through trimmed.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub device_name: String,
    pub driver_version: String,
    pub cuda_version: Option<String>,
    pub temperature_c: Option<f64>,
    pub fan_percent: Option<f64>,
    pub power_watts: Option<f64>,
    pub power_limit_watts: Option<f64>,
    pub gpu_util_percent: Option<f64>,
    pub mem_util_percent: Option<f64>,
    pub mem_used_mb: Option<u64>,
    pub mem_total_mb: Option<u64>,
    pub pcie_gen_current: Option<u32>,
    pub pcie_gen_max: Option<u32>,
    pub pcie_lanes_current: Option<u32>,
    pub pcie_lanes_max: Option<u32>,
    // GT/s derived from the link generation
    pub pcie_transfer_current: Option<f64>,
    pub pcie_transfer_max: Option<f64>,
    pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub power_watts: Option<f64>,
}

impl From<&Sample> for HistoryEntry {
    fn from(s: &Sample) -> Self {
        HistoryEntry {
            timestamp: s.timestamp,
            temperature_c: s.temperature_c,
            power_watts: s.power_watts,
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Error,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatusEvent {
    pub level: StatusLevel,
    // error kind, e.g. "timeout"; absent on info messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn info(message: impl Into<String>) -> Self {
        StatusEvent {
            level: StatusLevel::Info,
            kind: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        StatusEvent {
            level: StatusLevel::Error,
            kind: Some(kind.to_string()),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Frames pushed to live clients: `{"type": "...", "data": ...}`.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Sample(Arc<Sample>),
    History(Arc<[HistoryEntry]>),
    Status(StatusEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Sample(_) => "sample",
            Event::History(_) => "history",
            Event::Status(_) => "status",
        }
    }
}
