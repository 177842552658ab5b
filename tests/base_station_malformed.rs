//! Base station withholds acknowledgments for payloads it cannot interpret.

mod common;

use std::sync::Arc;
use std::time::Duration;

use amulink::mission::MemorySink;
use amulink::radio::loopback::SimulatedAir;
use amulink::station::dispatcher::{Dispatch, Dispatcher};
use amulink::station::BaseStation;
use tokio::sync::mpsc;

#[test]
fn malformed_waypoint_is_logged_not_acknowledged() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = Dispatcher::new(tx, sink.clone());

    let raw = "+RCV=4,11,4:33.6,-117,-60,9";
    assert_eq!(
        dispatcher.handle_line(raw),
        Dispatch::Malformed {
            raw: raw.to_string()
        }
    );
    assert!(rx.try_recv().is_err());
    assert!(sink.is_empty());
}

#[tokio::test]
async fn live_station_stays_silent_on_garbage() {
    let air = SimulatedAir::default();
    let cfg = common::fast_config(4, &[]);
    let station = BaseStation::new(cfg, Arc::new(MemorySink::new()));
    let handle = station.handle();
    let task = tokio::spawn(station.run(Box::new(air.attach(common::BASE_ADDR))));
    tokio::time::sleep(Duration::from_millis(100)).await;

    air.inject(common::BASE_ADDR, "+RCV=4,11,4:x:1.0,2.0,-60,9");
    air.inject(common::BASE_ADDR, "+RCV=4,99,REG:4,-60,9");
    air.inject(common::BASE_ADDR, "+RCV=4,5,REG:4,-60,9");
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();
    let fleet = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("station stops")
        .expect("join")
        .expect("station run");

    // Only the well-formed registration got an answer.
    let sent: Vec<_> = air
        .history()
        .into_iter()
        .filter(|f| f.from == common::BASE_ADDR)
        .map(|f| f.payload)
        .collect();
    assert_eq!(sent, vec!["ACKREG:4".to_string()]);
    assert_eq!(fleet.len(), 1);
}
