//! Full node <-> base run over the simulated air: registration, then every waypoint.

mod common;

use amulink::mission::AckStatus;
use amulink::protocol::MessageKind;
use amulink::radio::loopback::SimulatedAir;
use amulink::protocol::SignalQuality;

#[tokio::test]
async fn node_registers_and_delivers_route() {
    let air = SimulatedAir::new(SignalQuality { rssi: -62, snr: 8 });
    let cfg = common::fast_config(4, &[[33.686377, -117.789653], [33.6851, -117.7905]]);
    let run = common::run_mission(&air, cfg).await;

    assert!(run.report.registered);
    assert_eq!(run.report.delivered, vec![0, 1]);
    assert!(run.report.failed.is_empty());
    assert_eq!(run.report.attempts, 3, "no retries on a clean channel");

    let records = run.node_records.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].kind, MessageKind::Registration);
    assert!(records.iter().all(|r| r.ack_status == AckStatus::Received));
    assert!(records.iter().all(|r| r.attempt == Some(1)));
    assert_eq!(records[0].node_label.as_deref(), Some("AMU_04"));
    assert_eq!((records[0].rssi, records[0].snr), (Some(-62), Some(8)));
    assert_eq!(records[2].wp_index, Some(1));

    let entry = run.fleet.get(4).expect("base tracked the node");
    assert!(entry.registered);
    assert_eq!(entry.waypoints_acked, 2);
    assert_eq!(entry.last_index, Some(1));

    let base_records = run.base_records.records();
    assert_eq!(base_records.len(), 3);
    assert!(base_records.iter().all(|r| r.ack_status == AckStatus::Sent));
    assert!(base_records.iter().all(|r| r.node_label.is_none()));
}

#[tokio::test]
async fn acknowledgments_are_addressed_to_the_sender() {
    let air = SimulatedAir::default();
    let cfg = common::fast_config(7, &[]);
    let run = common::run_mission(&air, cfg).await;
    assert!(run.report.registered);

    let history = air.history();
    let ack = history
        .iter()
        .find(|f| f.payload == "ACKREG:7")
        .expect("base acknowledged");
    assert_eq!((ack.from, ack.to), (common::BASE_ADDR, 7));
    let reg = history
        .iter()
        .find(|f| f.payload == "REG:7")
        .expect("node registered");
    assert_eq!((reg.from, reg.to), (7, common::BASE_ADDR));
}

#[tokio::test]
async fn foreign_network_never_hears_the_node() {
    let air = SimulatedAir::default();
    let mut cfg = common::fast_config(5, &[[1.0, 2.0]]);
    cfg.node.max_retries = 2;

    // Base on another network id: every node frame goes unanswered.
    let mut base_cfg = cfg.clone();
    base_cfg.radio.network_id = 9;
    let station = amulink::station::BaseStation::new(
        base_cfg,
        std::sync::Arc::new(amulink::mission::MemorySink::new()),
    );
    let handle = station.handle();
    let base = tokio::spawn(station.run(Box::new(air.attach(common::BASE_ADDR))));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let report = amulink::node::NodeRuntime::new(
        cfg,
        std::sync::Arc::new(amulink::mission::MemorySink::new()),
    )
    .run(Box::new(air.attach(5)))
    .await
    .expect("node run");
    handle.stop();
    let fleet = base.await.expect("join").expect("base run");

    assert!(!report.registered);
    assert_eq!(report.failed, vec![0]);
    assert_eq!(report.attempts, 4);
    assert!(fleet.is_empty());
}
