//! Base station receive path: classify each inbound frame, acknowledge it to the sender's radio
//! address, update the fleet registry and write a mission record.
//!
//! Handling a line is synchronous: parse, enqueue the reply on the writer queue, bookkeeping.
//! Nothing here waits on the radio.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::logutil::escape_log;
use crate::metrics;
use crate::mission::{AckStatus, DeliveryRecord, DeliverySink};
use crate::node::wait_for_stop;
use crate::protocol::codec::{self, Frame, ModemLine, RECV_DIRECTIVE};
use crate::protocol::message::{self, Message};
use crate::radio::OutgoingFrame;

use super::fleet::FleetRegistry;

/// What [`Dispatcher::handle_line`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Registered { node_id: u16, sender: u16 },
    Waypoint { node_id: u16, index: usize, sender: u16 },
    /// Payload could not be interpreted; nothing was sent.
    Malformed { raw: String },
    /// Not an inbound data frame.
    Ignored,
}

pub struct Dispatcher {
    fleet: FleetRegistry,
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    sink: Arc<dyn DeliverySink>,
}

impl Dispatcher {
    pub fn new(outgoing: mpsc::UnboundedSender<OutgoingFrame>, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            fleet: FleetRegistry::new(),
            outgoing,
            sink,
        }
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.fleet
    }

    pub fn into_fleet(self) -> FleetRegistry {
        self.fleet
    }

    pub fn handle_line(&mut self, line: &str) -> Dispatch {
        match codec::classify(line) {
            ModemLine::Received(frame) => self.handle_frame(&frame, line),
            ModemLine::Other(raw) if raw.starts_with(RECV_DIRECTIVE) => {
                metrics::inc_decode_failures();
                warn!("[BaseStation] Unexpected format: '{}'", escape_log(&raw));
                Dispatch::Ignored
            }
            ModemLine::Error(code) => {
                warn!("[BaseStation] Modem reported +ERR={}", code);
                Dispatch::Ignored
            }
            _ => Dispatch::Ignored,
        }
    }

    /// `raw` is the line as the modem printed it, kept for the malformed-payload log.
    pub fn handle_frame(&mut self, frame: &Frame, raw: &str) -> Dispatch {
        if message::is_registration(&frame.payload) {
            return match message::parse_registration(&frame.payload) {
                Ok(node_id) => self.acknowledge_registration(frame, node_id),
                Err(e) => self.malformed(frame, raw, &e.to_string()),
            };
        }
        match message::parse_report(&frame.payload) {
            Ok(Message::Report {
                node_id,
                index,
                waypoint,
            }) => {
                let ack = Message::ReportAck { node_id, index };
                self.reply(frame.sender, &ack);
                self.fleet.record_waypoint(frame, node_id, index);
                info!(
                    "[BaseStation] Node {} Waypoint {}: Lat={}, Lon={}, {}",
                    node_id, index, waypoint.lat, waypoint.lon, frame.quality
                );
                self.sink.record(
                    &DeliveryRecord::waypoint(node_id, None, index, waypoint, AckStatus::Sent)
                        .with_quality(Some(frame.quality)),
                );
                Dispatch::Waypoint {
                    node_id,
                    index,
                    sender: frame.sender,
                }
            }
            Ok(_) => self.malformed(frame, raw, "not a waypoint report"),
            Err(e) => self.malformed(frame, raw, &e.to_string()),
        }
    }

    fn acknowledge_registration(&mut self, frame: &Frame, node_id: u16) -> Dispatch {
        self.reply(frame.sender, &Message::RegisterAck { node_id });
        self.fleet.mark_registered(frame, node_id);
        info!(
            "[BaseStation] Registration from Node {}: {}",
            node_id, frame.quality
        );
        self.sink.record(
            &DeliveryRecord::registration(node_id, None, AckStatus::Sent)
                .with_quality(Some(frame.quality)),
        );
        Dispatch::Registered {
            node_id,
            sender: frame.sender,
        }
    }

    fn malformed(&mut self, frame: &Frame, raw: &str, reason: &str) -> Dispatch {
        metrics::inc_malformed();
        warn!(
            "[BaseStation] Malformed payload from {} ({}): '{}'",
            frame.sender,
            reason,
            escape_log(raw)
        );
        Dispatch::Malformed {
            raw: raw.to_string(),
        }
    }

    fn reply(&self, dest: u16, ack: &Message) {
        let payload = ack.encode();
        if self.outgoing.send(OutgoingFrame::send(dest, payload.clone())).is_err() {
            warn!("[BaseStation] Writer gone; could not send {}", payload);
            return;
        }
        metrics::inc_acks_sent();
        debug!("[BaseStation] Sent ACK to {}: {}", dest, payload);
    }

    /// Consume lines until stopped or the stream ends, logging a fleet summary every
    /// `summary_every` when set.
    pub async fn run(
        mut self,
        mut lines: mpsc::UnboundedReceiver<String>,
        mut stop: watch::Receiver<bool>,
        summary_every: Option<Duration>,
    ) -> FleetRegistry {
        info!("[BaseStation] Listening for node transmissions...");
        let period = summary_every.unwrap_or(Duration::from_secs(3600));
        let mut summary = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break,
                line = lines.recv() => {
                    match line {
                        Some(line) => {
                            self.handle_line(&line);
                        }
                        None => {
                            debug!("[BaseStation] Radio line stream ended");
                            break;
                        }
                    }
                }
                _ = summary.tick(), if summary_every.is_some() => self.log_summary(),
            }
        }
        self.log_summary();
        self.fleet
    }

    pub fn log_summary(&self) {
        info!("[BaseStation] Fleet summary: {} node(s)", self.fleet.len());
        for line in self.fleet.summary_lines() {
            info!("[BaseStation]   {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MemorySink;

    fn dispatcher() -> (
        Dispatcher,
        mpsc::UnboundedReceiver<OutgoingFrame>,
        Arc<MemorySink>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(MemorySink::new());
        (Dispatcher::new(tx, sink.clone()), rx, sink)
    }

    #[test]
    fn registration_is_acknowledged_to_sender_address() {
        let (mut d, mut rx, sink) = dispatcher();
        let outcome = d.handle_line("+RCV=9,5,REG:4,-40,10");
        assert_eq!(outcome, Dispatch::Registered { node_id: 4, sender: 9 });
        assert_eq!(rx.try_recv().expect("ack"), OutgoingFrame::send(9, "ACKREG:4"));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ack_status, AckStatus::Sent);
        assert_eq!(records[0].node_label, None);
        assert_eq!(records[0].rssi, Some(-40));
        assert!(d.fleet().get(9).expect("entry").registered);
    }

    #[test]
    fn waypoint_is_acknowledged_and_tracked() {
        let (mut d, mut rx, sink) = dispatcher();
        let outcome = d.handle_line("+RCV=4,25,4:2:33.686377,-117.789653,-60,9");
        assert_eq!(outcome, Dispatch::Waypoint { node_id: 4, index: 2, sender: 4 });
        assert_eq!(rx.try_recv().expect("ack"), OutgoingFrame::send(4, "ACK:4:2"));
        let rec = &sink.records()[0];
        assert_eq!(rec.wp_index, Some(2));
        assert_eq!(rec.lat, Some(33.686377));
        assert_eq!(d.fleet().get(4).expect("entry").last_index, Some(2));
    }

    #[test]
    fn malformed_payloads_get_no_reply() {
        let (mut d, mut rx, sink) = dispatcher();
        for line in [
            "+RCV=4,11,4:33.6,-117,-60,9",
            "+RCV=4,7,REG:abc,-60,9",
            "+RCV=4,11,4:x:1.0,2.0,-60,9",
            "+RCV=4,5,hello,-60,9",
        ] {
            assert!(matches!(d.handle_line(line), Dispatch::Malformed { .. }), "{}", line);
        }
        assert!(rx.try_recv().is_err());
        assert!(sink.is_empty());
        assert!(d.fleet().is_empty());
    }

    #[test]
    fn malformed_keeps_the_line_as_received() {
        let (mut d, mut rx, _) = dispatcher();
        let raw = "  +RCV=4,11,4:x:1.0,2.0,-60,9\r\n";
        assert_eq!(
            d.handle_line(raw),
            Dispatch::Malformed {
                raw: raw.to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn housekeeping_is_ignored() {
        let (mut d, mut rx, _) = dispatcher();
        assert_eq!(d.handle_line("+OK"), Dispatch::Ignored);
        assert_eq!(d.handle_line("+RCV=garbage"), Dispatch::Ignored);
        assert!(rx.try_recv().is_err());
    }
}
