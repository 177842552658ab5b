//! # Field node
//!
//! A node registers with the base station and then reports its route one waypoint at a time,
//! retrying each message until it is acknowledged or the attempt cap is reached.
//!
//! - [`backoff`] - randomized exponential retry delay
//! - [`correlator`] - the single armed acknowledgment shared by sender and listener
//! - [`session`] - registration and waypoint delivery state machine
//! - [`listener`] - inbound line handling
//!
//! [`NodeRuntime`] assembles these on top of a [`crate::radio`] link: it programs the modem,
//! starts the listener, runs the session to completion (or until [`NodeHandle::stop`]) and then
//! tears the radio down.

pub mod backoff;
pub mod correlator;
pub mod listener;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::watch;

use crate::config::{Config, NodeConfig};
use crate::metrics;
use crate::mission::DeliverySink;
use crate::radio::{configure_modem, create_reader_writer_system, RadioPort, WriterTuning};

use correlator::AckCorrelator;
use listener::InboundListener;
use session::{NodeSession, SessionReport, SessionSettings};

/// Who this node is on the air. Fixed for the life of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: u16,
    pub base_id: u16,
    pub label: String,
}

impl NodeIdentity {
    pub fn new(node_id: u16, base_id: u16, label: Option<String>) -> Self {
        Self {
            node_id,
            base_id,
            label: label.unwrap_or_else(|| format!("AMU_{:02}", node_id)),
        }
    }

    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self::new(cfg.node_id, cfg.base_id, Some(cfg.label()))
    }
}

/// Cloneable stop switch shared by everything a runtime spawns.
#[derive(Clone)]
pub struct NodeHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Idempotent; safe from any task.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

impl Default for NodeHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once the stop flag is raised. Never resolves if the sender is gone without stopping.
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct NodeRuntime {
    config: Config,
    sink: Arc<dyn DeliverySink>,
    handle: NodeHandle,
}

impl NodeRuntime {
    pub fn new(config: Config, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            config,
            sink,
            handle: NodeHandle::new(),
        }
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub async fn run(self, port: Box<dyn RadioPort>) -> Result<SessionReport> {
        let cfg = &self.config;
        let identity = NodeIdentity::from_config(&cfg.node);
        let waypoints = cfg.node.waypoints();
        let grace = Duration::from_millis(cfg.radio.shutdown_grace_ms);
        info!(
            "[{}] Node {} starting mission '{}' as {} with {} waypoints (base {})",
            identity.label,
            identity.node_id,
            cfg.node.mission_name,
            cfg.node.role,
            waypoints.len(),
            identity.base_id
        );

        let (outgoing, mut lines, tasks) =
            create_reader_writer_system(port, WriterTuning::from(&cfg.radio))
                .spawn()
                .into_parts();

        let settle = Duration::from_millis(cfg.radio.setup_settle_ms);
        if let Err(e) = configure_modem(&outgoing, &mut lines, &cfg.node_modem(), settle).await {
            tasks.shutdown(grace).await;
            return Err(e.into());
        }

        let correlator = Arc::new(AckCorrelator::new());
        let listener = InboundListener::new(
            identity.label.clone(),
            lines,
            correlator.clone(),
            self.handle.subscribe(),
        );
        let listener_task = tokio::spawn(listener.run());

        let label = identity.label.clone();
        let session = NodeSession::new(
            identity,
            waypoints,
            SessionSettings::from_config(&cfg.node),
            correlator,
            outgoing,
            self.sink.clone(),
            self.handle.subscribe(),
        );
        let report = session.run().await;

        // Session is over either way; release the listener and the radio.
        self.handle.stop();
        match tokio::time::timeout(grace, listener_task).await {
            Ok(Ok(stats)) => info!(
                "[{}] Listener stopped after {} lines ({} acks matched)",
                label, stats.lines, stats.matched
            ),
            Ok(Err(e)) => warn!("[{}] Listener task failed: {}", label, e),
            Err(_) => warn!("[{}] Listener did not stop within grace period", label),
        }
        tasks.shutdown(grace).await;

        info!(
            "[{}] Shutdown complete. registered={} delivered={:?} failed={:?} ({})",
            label,
            report.registered,
            report.delivered,
            report.failed,
            metrics::snapshot()
        );
        Ok(report)
    }
}
