//! Test utilities & fixtures.
//! Builds configs with millisecond timings so whole node/base runs over the simulated air finish
//! quickly.

use std::sync::Arc;
use std::time::Duration;

use amulink::config::Config;
use amulink::mission::MemorySink;
use amulink::node::session::SessionReport;
use amulink::node::NodeRuntime;
use amulink::radio::loopback::SimulatedAir;
use amulink::station::fleet::FleetRegistry;
use amulink::station::BaseStation;

pub const BASE_ADDR: u16 = 1;

/// Node `node_id` reporting `waypoints` to [`BASE_ADDR`], fast radio and retry timings.
pub fn fast_config(node_id: u16, waypoints: &[[f64; 2]]) -> Config {
    let mut cfg = Config::default();
    cfg.radio.min_send_gap_ms = 0;
    cfg.radio.read_poll_ms = 2;
    cfg.radio.setup_settle_ms = 30;
    cfg.radio.shutdown_grace_ms = 500;
    cfg.node.node_id = node_id;
    cfg.node.base_id = BASE_ADDR;
    cfg.node.registration_timeout_ms = 300;
    cfg.node.ack_timeout_ms = 300;
    cfg.node.retry_delay_min_secs = 0;
    cfg.node.retry_delay_max_secs = 0;
    cfg.node.backoff_jitter_ms = 0;
    cfg.node.waypoints = waypoints.to_vec();
    cfg.base.address = BASE_ADDR;
    cfg.base.summary_interval_secs = 0;
    cfg.logging.file = None;
    cfg.logging.mission_file = None;
    cfg
}

/// Outcome of a node run against a live base station on the same air.
#[allow(dead_code)] // not every test binary reads every field
pub struct MissionRun {
    pub report: SessionReport,
    pub fleet: FleetRegistry,
    pub node_records: Arc<MemorySink>,
    pub base_records: Arc<MemorySink>,
}

/// Start a base station on `air`, let it program its modem, then run a node to completion and
/// stop the station.
#[allow(dead_code)]
pub async fn run_mission(air: &SimulatedAir, cfg: Config) -> MissionRun {
    let base_records = Arc::new(MemorySink::new());
    let station = BaseStation::new(cfg.clone(), base_records.clone());
    let station_handle = station.handle();
    let base_task = tokio::spawn(station.run(Box::new(air.attach(BASE_ADDR))));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let node_records = Arc::new(MemorySink::new());
    let node_addr = cfg.node.node_id;
    let report = NodeRuntime::new(cfg, node_records.clone())
        .run(Box::new(air.attach(node_addr)))
        .await
        .expect("node run");

    station_handle.stop();
    let fleet = tokio::time::timeout(Duration::from_secs(5), base_task)
        .await
        .expect("base stops")
        .expect("join")
        .expect("base run");

    MissionRun {
        report,
        fleet,
        node_records,
        base_records,
    }
}
