//! # Base station
//!
//! Listens for node traffic on one modem and acknowledges every well-formed registration and
//! waypoint back to the radio address it came from. The station never retries: an ack that is
//! lost on the air is recovered by the node re-sending.
//!
//! - [`dispatcher`] - per-line classification and acknowledgment
//! - [`fleet`] - what the station knows about each node

pub mod dispatcher;
pub mod fleet;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;

use crate::config::Config;
use crate::metrics;
use crate::mission::DeliverySink;
use crate::node::NodeHandle;
use crate::radio::{configure_modem, create_reader_writer_system, RadioPort, WriterTuning};

use dispatcher::Dispatcher;
use fleet::FleetRegistry;

pub struct BaseStation {
    config: Config,
    sink: Arc<dyn DeliverySink>,
    handle: NodeHandle,
}

impl BaseStation {
    pub fn new(config: Config, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            config,
            sink,
            handle: NodeHandle::new(),
        }
    }

    /// Stop switch for [`BaseStation::run`]. The station otherwise runs until its port closes.
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub async fn run(self, port: Box<dyn RadioPort>) -> Result<FleetRegistry> {
        let cfg = &self.config;
        let grace = Duration::from_millis(cfg.radio.shutdown_grace_ms);
        info!(
            "[BaseStation] Starting on address {} (network {})",
            cfg.base.address, cfg.radio.network_id
        );

        let (outgoing, mut lines, tasks) =
            create_reader_writer_system(port, WriterTuning::from(&cfg.radio))
                .spawn()
                .into_parts();

        let settle = Duration::from_millis(cfg.radio.setup_settle_ms);
        if let Err(e) = configure_modem(&outgoing, &mut lines, &cfg.base_modem(), settle).await {
            tasks.shutdown(grace).await;
            return Err(e.into());
        }

        let summary_every = match cfg.base.summary_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let fleet = Dispatcher::new(outgoing, self.sink.clone())
            .run(lines, self.handle.subscribe(), summary_every)
            .await;

        tasks.shutdown(grace).await;
        info!(
            "[BaseStation] Shutdown complete. nodes={} ({})",
            fleet.len(),
            metrics::snapshot()
        );
        Ok(fleet)
    }
}
