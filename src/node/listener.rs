//! Inbound side of a node: turns modem lines into correlator resolutions.
//!
//! The listener never writes to the radio. Anything that is not a decodable `+RCV` notification
//! carrying the armed acknowledgment is dropped here.

use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, watch};

use crate::logutil::escape_log;
use crate::metrics;
use crate::protocol::codec::{self, ModemLine, RECV_DIRECTIVE};

use super::correlator::AckCorrelator;
use super::wait_for_stop;

/// What the listener did with one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Resolved the armed acknowledgment.
    Matched,
    /// A valid frame that was not the armed acknowledgment.
    Unmatched,
    /// Modem chatter (`+OK`, `+ERR=..`, `+READY`, query echoes).
    Housekeeping,
    /// Looked like a notification but failed to decode.
    Undecodable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub lines: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub undecodable: u64,
}

pub struct InboundListener {
    label: String,
    lines: mpsc::UnboundedReceiver<String>,
    correlator: Arc<AckCorrelator>,
    stop: watch::Receiver<bool>,
}

impl InboundListener {
    pub fn new(
        label: impl Into<String>,
        lines: mpsc::UnboundedReceiver<String>,
        correlator: Arc<AckCorrelator>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            label: label.into(),
            lines,
            correlator,
            stop,
        }
    }

    pub async fn run(mut self) -> ListenerStats {
        let mut stats = ListenerStats::default();
        loop {
            let line = tokio::select! {
                biased;
                _ = wait_for_stop(&mut self.stop) => break,
                line = self.lines.recv() => line,
            };
            let Some(line) = line else {
                debug!("[{}] Radio line stream ended", self.label);
                break;
            };
            stats.lines += 1;
            match self.handle_line(&line) {
                LineOutcome::Matched => stats.matched += 1,
                LineOutcome::Unmatched => stats.unmatched += 1,
                LineOutcome::Undecodable => stats.undecodable += 1,
                LineOutcome::Housekeeping => {}
            }
        }
        debug!(
            "[{}] Listener exiting: lines={} matched={} unmatched={} undecodable={}",
            self.label, stats.lines, stats.matched, stats.unmatched, stats.undecodable
        );
        stats
    }

    pub fn handle_line(&self, line: &str) -> LineOutcome {
        match codec::classify(line) {
            ModemLine::Received(frame) => {
                if self.correlator.try_resolve(&frame.payload, frame.quality) {
                    info!(
                        "[{} RX] ACK matched: {} ({})",
                        self.label, frame.payload, frame.quality
                    );
                    LineOutcome::Matched
                } else {
                    debug!(
                        "[{} RX] Ignoring {} from {}",
                        self.label,
                        escape_log(&frame.payload),
                        frame.sender
                    );
                    LineOutcome::Unmatched
                }
            }
            ModemLine::Error(code) => {
                warn!("[{}] Modem reported +ERR={}", self.label, code);
                LineOutcome::Housekeeping
            }
            ModemLine::Other(raw) if raw.starts_with(RECV_DIRECTIVE) => {
                metrics::inc_decode_failures();
                let reason = codec::decode_checked(&raw)
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                debug!(
                    "[{}] Dropping undecodable line '{}': {}",
                    self.label,
                    escape_log(&raw),
                    reason
                );
                LineOutcome::Undecodable
            }
            other => {
                trace!("[{}] Modem: {:?}", self.label, other);
                LineOutcome::Housekeeping
            }
        }
    }
}
