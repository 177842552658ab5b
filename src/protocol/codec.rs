//! Text framing for AT-commanded LoRa modems (RYLR-style).
//!
//! Outbound data is handed to the modem as a directive:
//!
//!   `AT+SEND=<dest>,<len>,<payload>\r\n`
//!
//! Inbound data arrives as a notification line:
//!
//!   `+RCV=<sender>,<len>,<payload>,<rssi>,<snr>`
//!
//! Payloads may themselves contain commas (a waypoint report carries `lat,lon`), so a notification
//! is split two fields from the left and two from the right; whatever sits in between is the
//! opaque payload. Everything else the modem prints (`+OK`, `+ERR=4`, `+READY`, query echoes) is
//! housekeeping and never yields a [`Frame`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directive used to hand a payload to the modem for transmission.
pub const SEND_DIRECTIVE: &str = "AT+SEND";
/// Prefix of inbound data notifications.
pub const RECV_DIRECTIVE: &str = "+RCV";
/// Line terminator expected by the modem.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Link quality reported alongside an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalQuality {
    pub rssi: i32,
    pub snr: i32,
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSSI={}, SNR={}", self.rssi, self.snr)
    }
}

/// One decoded inbound data notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: u16,
    pub length: usize,
    pub payload: String,
    pub quality: SignalQuality,
}

/// Why a line did not decode into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not an inbound data notification")]
    NotInbound,

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("invalid {field} value '{value}'")]
    BadNumber { field: &'static str, value: String },

    #[error("declared length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Coarse classification of a line printed by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemLine {
    /// Inbound data notification that decoded cleanly.
    Received(Frame),
    /// `+OK` reply to a directive.
    Ok,
    /// `+ERR=<code>` reply to a directive.
    Error(String),
    /// `+READY` after a module reset.
    Ready,
    /// Anything else (query echoes, malformed notifications, noise).
    Other(String),
}

/// Build the outbound directive for `payload` addressed to `dest`.
pub fn encode_send(dest: u16, payload: &str) -> String {
    format!(
        "{}={},{},{}{}",
        SEND_DIRECTIVE,
        dest,
        payload.len(),
        payload,
        LINE_TERMINATOR
    )
}

/// Build a modem setting directive, e.g. `AT+ADDRESS=4\r\n`.
pub fn encode_command(name: &str, value: impl fmt::Display) -> String {
    format!("AT+{}={}{}", name, value, LINE_TERMINATOR)
}

/// Build a modem query directive, e.g. `AT+ADDRESS?\r\n`.
pub fn encode_query(name: &str) -> String {
    format!("AT+{}?{}", name, LINE_TERMINATOR)
}

/// Decode an inbound notification, returning `None` for housekeeping or malformed lines.
pub fn decode_received(line: &str) -> Option<Frame> {
    decode_checked(line).ok()
}

/// Decode an inbound notification, reporting why decoding failed.
pub fn decode_checked(line: &str) -> Result<Frame, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line
        .strip_prefix(RECV_DIRECTIVE)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or(DecodeError::NotInbound)?;

    // Fixed fields from the left: sender, length.
    let mut left = body.splitn(3, ',');
    let sender_raw = left.next().ok_or(DecodeError::MissingField("sender"))?;
    let length_raw = left.next().ok_or(DecodeError::MissingField("length"))?;
    let rest = left.next().ok_or(DecodeError::MissingField("payload"))?;

    // Fixed fields from the right: snr, rssi.
    let mut right = rest.rsplitn(3, ',');
    let snr_raw = right.next().ok_or(DecodeError::MissingField("snr"))?;
    let rssi_raw = right.next().ok_or(DecodeError::MissingField("rssi"))?;
    let payload = right.next().ok_or(DecodeError::MissingField("payload"))?;

    let sender = parse_field::<u16>("sender", sender_raw)?;
    let length = parse_field::<usize>("length", length_raw)?;
    let rssi = parse_field::<i32>("rssi", rssi_raw)?;
    let snr = parse_field::<i32>("snr", snr_raw)?;

    if length != payload.len() {
        return Err(DecodeError::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }

    Ok(Frame {
        sender,
        length,
        payload: payload.to_string(),
        quality: SignalQuality { rssi, snr },
    })
}

/// Classify any line the modem printed.
pub fn classify(line: &str) -> ModemLine {
    let trimmed = line.trim();
    if trimmed.starts_with(RECV_DIRECTIVE) {
        return match decode_checked(trimmed) {
            Ok(frame) => ModemLine::Received(frame),
            Err(_) => ModemLine::Other(trimmed.to_string()),
        };
    }
    match trimmed {
        "+OK" => ModemLine::Ok,
        "+READY" => ModemLine::Ready,
        _ => match trimmed.strip_prefix("+ERR=") {
            Some(code) => ModemLine::Error(code.to_string()),
            None => ModemLine::Other(trimmed.to_string()),
        },
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, DecodeError> {
    raw.trim().parse::<T>().map_err(|_| DecodeError::BadNumber {
        field,
        value: raw.to_string(),
    })
}
