//! Structured mission log records and the sinks that accept them.
//!
//! Every delivery attempt on a node, and every acknowledgment a base station issues, becomes one
//! [`DeliveryRecord`]. Missing values render as `N/A`, both in the operator text line and in CSV.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::protocol::codec::SignalQuality;
use crate::protocol::message::{MessageKind, Waypoint};

/// Log target that `init_logging` routes to the mission log file.
pub const MISSION_TARGET: &str = "mission";

pub const CSV_HEADER: &str = "timestamp,node_id,node_label,type,wp_index,lat,lon,rssi,snr,ack_status";

const NA: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// Node side: the matching acknowledgment arrived in time.
    Received,
    /// Node side: no matching acknowledgment before the per-attempt timeout.
    Timeout,
    /// Base side: an acknowledgment was queued back to the sender.
    Sent,
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AckStatus::Received => "Received",
            AckStatus::Timeout => "Timeout",
            AckStatus::Sent => "Sent",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub timestamp: DateTime<Utc>,
    pub node_id: u16,
    pub node_label: Option<String>,
    pub kind: MessageKind,
    pub wp_index: Option<usize>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub rssi: Option<i32>,
    pub snr: Option<i32>,
    pub ack_status: AckStatus,
    /// 1-based attempt number; `None` for base station records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl DeliveryRecord {
    pub fn registration(node_id: u16, label: Option<&str>, status: AckStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id,
            node_label: label.map(str::to_string),
            kind: MessageKind::Registration,
            wp_index: None,
            lat: None,
            lon: None,
            rssi: None,
            snr: None,
            ack_status: status,
            attempt: None,
        }
    }

    pub fn waypoint(
        node_id: u16,
        label: Option<&str>,
        index: usize,
        waypoint: Waypoint,
        status: AckStatus,
    ) -> Self {
        Self {
            wp_index: Some(index),
            lat: Some(waypoint.lat),
            lon: Some(waypoint.lon),
            kind: MessageKind::Waypoint,
            ..Self::registration(node_id, label, status)
        }
    }

    pub fn with_quality(mut self, quality: Option<SignalQuality>) -> Self {
        self.rssi = quality.map(|q| q.rssi);
        self.snr = quality.map(|q| q.snr);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Column values in [`CSV_HEADER`] order.
    pub fn fields(&self) -> [String; 10] {
        [
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.node_id.to_string(),
            self.node_label.clone().unwrap_or_else(|| NA.to_string()),
            self.kind.to_string(),
            or_na(self.wp_index),
            or_na(self.lat),
            or_na(self.lon),
            or_na(self.rssi),
            or_na(self.snr),
            self.ack_status.to_string(),
        ]
    }

    pub fn to_csv_row(&self) -> String {
        self.fields()
            .iter()
            .map(|f| csv_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for DeliveryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [ts, node_id, label, kind, wp_index, lat, lon, rssi, snr, ack] = self.fields();
        write!(
            f,
            "[{}] node_id={}, label={}, type={}, wp_index={}, lat={}, lon={}, RSSI={}, SNR={}, ACK={}",
            ts, node_id, label, kind, wp_index, lat, lon, rssi, snr, ack
        )
    }
}

/// RFC 4180 quoting for fields carrying a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| NA.to_string())
}

/// Destination for mission records. Implementations must not block for long; they are called
/// from the transmit loop and the base station dispatcher.
pub trait DeliverySink: Send + Sync {
    fn record(&self, record: &DeliveryRecord);
}

/// Writes each record as one line on the `mission` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn record(&self, record: &DeliveryRecord) {
        info!(target: MISSION_TARGET, "{}", record);
    }
}

/// Keeps records in memory; used by tests and the smoke run.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DeliveryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliverySink for MemorySink {
    fn record(&self, record: &DeliveryRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Appends CSV rows to a file, writing the header when the file is new.
#[derive(Debug)]
pub struct CsvSink {
    file: Mutex<File>,
}

impl CsvSink {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let fresh = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if fresh {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl DeliverySink for CsvSink {
    fn record(&self, record: &DeliveryRecord) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", record.to_csv_row()).and_then(|_| file.flush()) {
            warn!("Failed to append mission CSV row: {}", e);
        }
    }
}

/// Forwards every record to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DeliverySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DeliverySink>>) -> Self {
        Self { sinks }
    }
}

impl DeliverySink for FanoutSink {
    fn record(&self, record: &DeliveryRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
