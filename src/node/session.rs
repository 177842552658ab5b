//! The node's transmit side: registration, then strictly sequential waypoint delivery.
//!
//! Each message goes through the same attempt loop: arm the correlator with the expected
//! acknowledgment, queue the frame, wait up to the per-attempt timeout, record the attempt, and
//! back off before the next try. A message that exhausts its attempts is logged and skipped;
//! registration failure does not prevent waypoint delivery.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::config::NodeConfig;
use crate::metrics;
use crate::mission::{AckStatus, DeliveryRecord, DeliverySink};
use crate::protocol::codec::SignalQuality;
use crate::protocol::message::{Message, MessageKind, Waypoint};
use crate::radio::OutgoingFrame;

use super::backoff::BackoffPolicy;
use super::correlator::AckCorrelator;
use super::{wait_for_stop, NodeIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Registering,
    Registered,
    /// Delivering the waypoint at this index.
    Sending(usize),
    Done,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no acknowledgment after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("session stopped")]
    Stopped,

    #[error("radio link closed")]
    LinkClosed,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_retries: u32,
    pub registration_timeout: Duration,
    pub ack_timeout: Duration,
    pub tx_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl SessionSettings {
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            registration_timeout: Duration::from_millis(cfg.registration_timeout_ms),
            ack_timeout: Duration::from_millis(cfg.ack_timeout_ms),
            tx_interval: cfg.tx_interval(),
            backoff: cfg.backoff(),
        }
    }
}

/// What a finished session accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub registered: bool,
    pub delivered: Vec<usize>,
    pub failed: Vec<usize>,
    /// Frames transmitted across all messages.
    pub attempts: u32,
    pub stopped: bool,
}

pub struct NodeSession {
    identity: NodeIdentity,
    waypoints: Vec<Waypoint>,
    settings: SessionSettings,
    correlator: Arc<AckCorrelator>,
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    sink: Arc<dyn DeliverySink>,
    stop: watch::Receiver<bool>,
    state_tx: watch::Sender<SessionState>,
    rng: StdRng,
    report: SessionReport,
}

impl NodeSession {
    pub fn new(
        identity: NodeIdentity,
        waypoints: Vec<Waypoint>,
        settings: SessionSettings,
        correlator: Arc<AckCorrelator>,
        outgoing: mpsc::UnboundedSender<OutgoingFrame>,
        sink: Arc<dyn DeliverySink>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            identity,
            waypoints,
            settings,
            correlator,
            outgoing,
            sink,
            stop,
            state_tx,
            rng: StdRng::from_entropy(),
            report: SessionReport::default(),
        }
    }

    /// Replace the backoff randomness, e.g. with a seeded generator.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub async fn run(mut self) -> SessionReport {
        let label = self.identity.label.clone();
        if self.is_stopped() {
            return self.finish_stopped();
        }

        self.set_state(SessionState::Registering);
        match self.deliver(&Message::register(self.identity.node_id)).await {
            Ok(()) => {
                self.report.registered = true;
                self.set_state(SessionState::Registered);
                info!("[{}] Registration acknowledged.", label);
            }
            Err(DeliveryError::Exhausted { attempts }) => {
                warn!(
                    "[{}] REG failed after {} attempts; continuing with waypoints",
                    label, attempts
                );
            }
            Err(e) => return self.interrupted(e),
        }

        let waypoints = self.waypoints.clone();
        for (index, waypoint) in waypoints.into_iter().enumerate() {
            if self.is_stopped() {
                return self.finish_stopped();
            }
            self.set_state(SessionState::Sending(index));
            let message = Message::report(self.identity.node_id, index, waypoint);
            match self.deliver(&message).await {
                Ok(()) => {
                    self.report.delivered.push(index);
                    info!("[{}] WP {} acknowledged.", label, index);
                    let spacing = self.settings.tx_interval;
                    if !spacing.is_zero() {
                        info!(
                            "[{}] Waiting tx_interval={:.1}s before next WP...",
                            label,
                            spacing.as_secs_f64()
                        );
                        if !self.pause(spacing).await {
                            return self.finish_stopped();
                        }
                    }
                }
                Err(DeliveryError::Exhausted { attempts }) => {
                    self.report.failed.push(index);
                    warn!("[{}] WP {} failed after {} attempts", label, index, attempts);
                }
                Err(e) => return self.interrupted(e),
            }
        }

        self.set_state(SessionState::Done);
        info!(
            "[{}] Route complete: {}/{} waypoints acknowledged",
            label,
            self.report.delivered.len(),
            self.waypoints.len()
        );
        self.report
    }

    fn interrupted(self, cause: DeliveryError) -> SessionReport {
        if cause == DeliveryError::LinkClosed {
            error!("[{}] Radio link closed mid-session", self.identity.label);
        }
        self.finish_stopped()
    }

    fn finish_stopped(mut self) -> SessionReport {
        self.correlator.clear();
        self.report.stopped = true;
        self.set_state(SessionState::Stopped);
        info!("[{}] Session stopped.", self.identity.label);
        self.report
    }

    /// Sleep for `duration`; false if stopped first.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = wait_for_stop(&mut self.stop) => false,
        }
    }

    async fn deliver(&mut self, message: &Message) -> Result<(), DeliveryError> {
        let payload = message.encode();
        let expected = message
            .expected_ack()
            .map(|ack| ack.encode())
            .unwrap_or_default();
        let timeout = match message.kind() {
            MessageKind::Registration => self.settings.registration_timeout,
            MessageKind::Waypoint => self.settings.ack_timeout,
        };
        let max = self.settings.max_retries.max(1);
        let correlator = self.correlator.clone();
        let label = self.identity.label.clone();

        for attempt in 1..=max {
            correlator.arm(expected.clone());
            if self
                .outgoing
                .send(OutgoingFrame::send(self.identity.base_id, payload.clone()))
                .is_err()
            {
                correlator.clear();
                return Err(DeliveryError::LinkClosed);
            }
            self.report.attempts += 1;
            metrics::inc_attempts();
            info!("[{}] TX {} attempt {}/{}", label, describe(message), attempt, max);

            let outcome = tokio::select! {
                outcome = correlator.wait_resolved(timeout) => Some(outcome),
                _ = wait_for_stop(&mut self.stop) => None,
            };
            correlator.clear();

            let acknowledged = outcome.map(|o| o.acknowledged).unwrap_or(false);
            let quality = outcome
                .and_then(|o| o.quality)
                .or_else(|| correlator.last_quality());
            let status = if acknowledged {
                AckStatus::Received
            } else {
                AckStatus::Timeout
            };
            self.sink
                .record(&self.record_for(message, status, quality, attempt));

            if outcome.is_none() {
                return Err(DeliveryError::Stopped);
            }
            if acknowledged {
                metrics::inc_acknowledged();
                return Ok(());
            }
            metrics::inc_timeouts();

            if attempt < max {
                let delay = self.settings.backoff.next_delay_with(
                    &mut self.rng,
                    attempt,
                    self.identity.node_id,
                );
                info!(
                    "[{}] {} backoff {:.1}s before retry...",
                    label,
                    describe(message),
                    delay.as_secs_f64()
                );
                if !self.pause(delay).await {
                    return Err(DeliveryError::Stopped);
                }
            }
        }

        metrics::inc_exhausted();
        Err(DeliveryError::Exhausted { attempts: max })
    }

    fn record_for(
        &self,
        message: &Message,
        status: AckStatus,
        quality: Option<SignalQuality>,
        attempt: u32,
    ) -> DeliveryRecord {
        let id = self.identity.node_id;
        let label = Some(self.identity.label.as_str());
        let record = match message {
            Message::Report {
                index, waypoint, ..
            } => DeliveryRecord::waypoint(id, label, *index, *waypoint, status),
            _ => DeliveryRecord::registration(id, label, status),
        };
        record.with_quality(quality).with_attempt(attempt)
    }
}

fn describe(message: &Message) -> String {
    match message {
        Message::Report { index, .. } => format!("WP {}", index),
        other => other.kind().to_string(),
    }
}
