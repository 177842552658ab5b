//! Per-node bookkeeping on the base station, keyed by the radio address a frame came from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::codec::{Frame, SignalQuality};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetEntry {
    pub address: u16,
    /// Node id the unit reported in its payloads.
    pub node_id: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_payload: String,
    pub last_quality: SignalQuality,
    pub registered: bool,
    pub waypoints_acked: u64,
    pub last_index: Option<usize>,
    pub messages: u64,
}

#[derive(Debug, Default)]
pub struct FleetRegistry {
    entries: BTreeMap<u16, FleetEntry>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the entry for `frame.sender`.
    pub fn observe(&mut self, frame: &Frame, node_id: u16) -> &mut FleetEntry {
        let now = Utc::now();
        let entry = self.entries.entry(frame.sender).or_insert_with(|| FleetEntry {
            address: frame.sender,
            node_id,
            first_seen: now,
            last_seen: now,
            last_payload: String::new(),
            last_quality: frame.quality,
            registered: false,
            waypoints_acked: 0,
            last_index: None,
            messages: 0,
        });
        entry.node_id = node_id;
        entry.last_seen = now;
        entry.last_payload = frame.payload.clone();
        entry.last_quality = frame.quality;
        entry.messages += 1;
        entry
    }

    pub fn mark_registered(&mut self, frame: &Frame, node_id: u16) {
        self.observe(frame, node_id).registered = true;
    }

    pub fn record_waypoint(&mut self, frame: &Frame, node_id: u16, index: usize) {
        let entry = self.observe(frame, node_id);
        entry.waypoints_acked += 1;
        entry.last_index = Some(index);
    }

    pub fn get(&self, address: u16) -> Option<&FleetEntry> {
        self.entries.get(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FleetEntry> {
        self.entries.values()
    }

    /// One line per node for the periodic summary log.
    pub fn summary_lines(&self) -> Vec<String> {
        self.iter()
            .map(|e| {
                format!(
                    "addr={} node={} registered={} waypoints={} last_wp={} last_seen={} {}",
                    e.address,
                    e.node_id,
                    e.registered,
                    e.waypoints_acked,
                    e.last_index
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "N/A".into()),
                    e.last_seen.format("%H:%M:%S"),
                    e.last_quality
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sender: u16, payload: &str, rssi: i32) -> Frame {
        Frame {
            sender,
            length: payload.len(),
            payload: payload.to_string(),
            quality: SignalQuality { rssi, snr: 5 },
        }
    }

    #[test]
    fn entries_are_created_once_and_refreshed() {
        let mut fleet = FleetRegistry::new();
        fleet.mark_registered(&frame(4, "REG:4", -40), 4);
        fleet.record_waypoint(&frame(4, "4:0:1,2", -55), 4, 0);
        fleet.record_waypoint(&frame(4, "4:1:1,3", -60), 4, 1);
        assert_eq!(fleet.len(), 1);
        let entry = fleet.get(4).expect("entry");
        assert!(entry.registered);
        assert_eq!(entry.messages, 3);
        assert_eq!(entry.waypoints_acked, 2);
        assert_eq!(entry.last_index, Some(1));
        assert_eq!(entry.last_payload, "4:1:1,3");
        assert_eq!(entry.last_quality.rssi, -60);
        assert!(entry.first_seen <= entry.last_seen);
    }

    #[test]
    fn summary_has_a_line_per_node() {
        let mut fleet = FleetRegistry::new();
        fleet.record_waypoint(&frame(7, "7:3:1,2", -40), 7, 3);
        fleet.mark_registered(&frame(2, "REG:2", -40), 2);
        let lines = fleet.summary_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("addr=2 node=2 registered=true waypoints=0 last_wp=N/A"));
        assert!(lines[1].contains("last_wp=3"));
    }
}
