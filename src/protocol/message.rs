//! Application payloads carried inside radio frames.
//!
//! All payloads are colon/comma delimited text and case-sensitive:
//!
//! | message              | payload                         |
//! |----------------------|---------------------------------|
//! | registration         | `REG:<nodeId>`                  |
//! | registration ack     | `ACKREG:<nodeId>`               |
//! | waypoint report      | `<nodeId>:<index>:<lat>,<lon>`  |
//! | waypoint ack         | `ACK:<nodeId>:<index>`          |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REG_TAG: &str = "REG";
pub const REG_ACK_TAG: &str = "ACKREG";
pub const WAYPOINT_ACK_TAG: &str = "ACK";

/// Which reliable message a delivery attempt carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "REG")]
    Registration,
    #[serde(rename = "WAYPOINT")]
    Waypoint,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Registration => "REG",
            MessageKind::Waypoint => "WAYPOINT",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<[f64; 2]> for Waypoint {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

/// Reasons a payload could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("expected 3 ':'-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("coordinates must be '<lat>,<lon>', got '{0}'")]
    Coordinates(String),
}

/// Every payload the protocol knows about.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Register { node_id: u16 },
    RegisterAck { node_id: u16 },
    Report { node_id: u16, index: usize, waypoint: Waypoint },
    ReportAck { node_id: u16, index: usize },
}

impl Message {
    pub fn register(node_id: u16) -> Self {
        Message::Register { node_id }
    }

    pub fn report(node_id: u16, index: usize, waypoint: Waypoint) -> Self {
        Message::Report {
            node_id,
            index,
            waypoint,
        }
    }

    /// Render the payload exactly as it goes on the air.
    pub fn encode(&self) -> String {
        match self {
            Message::Register { node_id } => format!("{}:{}", REG_TAG, node_id),
            Message::RegisterAck { node_id } => format!("{}:{}", REG_ACK_TAG, node_id),
            Message::Report {
                node_id,
                index,
                waypoint,
            } => format!("{}:{}:{},{}", node_id, index, waypoint.lat, waypoint.lon),
            Message::ReportAck { node_id, index } => {
                format!("{}:{}:{}", WAYPOINT_ACK_TAG, node_id, index)
            }
        }
    }

    /// The acknowledgment a base station answers this message with, if any.
    pub fn expected_ack(&self) -> Option<Message> {
        match *self {
            Message::Register { node_id } => Some(Message::RegisterAck { node_id }),
            Message::Report { node_id, index, .. } => Some(Message::ReportAck { node_id, index }),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Register { .. } | Message::RegisterAck { .. } => MessageKind::Registration,
            Message::Report { .. } | Message::ReportAck { .. } => MessageKind::Waypoint,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// True when `payload` carries the registration tag.
pub fn is_registration(payload: &str) -> bool {
    registration_body(payload).is_some()
}

/// Parse the node id out of `REG:<nodeId>`.
pub fn parse_registration(payload: &str) -> Result<u16, PayloadError> {
    let raw = registration_body(payload).ok_or(PayloadError::FieldCount(1))?;
    parse_num("node id", raw)
}

fn registration_body(payload: &str) -> Option<&str> {
    payload.strip_prefix(REG_TAG)?.strip_prefix(':')
}

/// Parse `<nodeId>:<index>:<lat>,<lon>`.
pub fn parse_report(payload: &str) -> Result<Message, PayloadError> {
    let fields: Vec<&str> = payload.split(':').collect();
    if fields.len() != 3 {
        return Err(PayloadError::FieldCount(fields.len()));
    }
    let node_id = parse_num::<u16>("node id", fields[0])?;
    let index = parse_num::<usize>("waypoint index", fields[1])?;
    let (lat_raw, lon_raw) = fields[2]
        .split_once(',')
        .ok_or_else(|| PayloadError::Coordinates(fields[2].to_string()))?;
    let lat = parse_num::<f64>("latitude", lat_raw)?;
    let lon = parse_num::<f64>("longitude", lon_raw)?;
    if !lat.is_finite() || !lon.is_finite() {
        return Err(PayloadError::Coordinates(fields[2].to_string()));
    }
    Ok(Message::report(node_id, index, Waypoint::new(lat, lon)))
}

fn parse_num<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, PayloadError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| PayloadError::InvalidField {
            field,
            value: raw.to_string(),
        })
}
