//! Loading, defaulting and validating configuration files.

use std::io::Write;

use amulink::config::{Config, ConfigError};
use tokio_test::{assert_err, assert_ok};

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(body.as_bytes()).expect("write");
    file
}

#[tokio::test]
async fn partial_file_fills_in_defaults() {
    let file = write_config(
        r#"
[radio]
port = "/dev/ttyUSB0"

[node]
node_id = 4
waypoints = [[33.686377, -117.789653], [33.6851, -117.7905]]
"#,
    );
    let cfg = assert_ok!(Config::load(file.path().to_str().expect("utf8 path")).await);
    assert_eq!(cfg.radio.port, "/dev/ttyUSB0");
    assert_eq!(cfg.radio.baud_rate, 115200);
    assert_eq!(cfg.node.node_id, 4);
    assert_eq!(cfg.node.label(), "AMU_04");
    assert_eq!(cfg.node.waypoints().len(), 2);
    assert_eq!(cfg.node.max_retries, 3);
    assert_eq!(cfg.base.address, 1);
}

#[tokio::test]
async fn out_of_range_retries_are_rejected() {
    let file = write_config("[node]\nmax_retries = 11\n");
    let err = assert_err!(Config::load(file.path().to_str().expect("utf8 path")).await);
    assert!(err.to_string().contains("max_retries"), "{}", err);
}

#[tokio::test]
async fn init_output_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    let path = path.to_str().expect("utf8 path");
    assert_ok!(Config::create_default(path).await);
    let cfg = assert_ok!(Config::load(path).await);
    assert_eq!(cfg.node.retry_delay_min_secs, 15);
    assert_eq!(cfg.node.retry_delay_max_secs, 80);
    assert_eq!(cfg.radio.network_id, 6);
}

#[test]
fn validation_catches_bad_waypoints_and_windows() {
    let mut cfg = Config::default();
    cfg.node.waypoints = vec![[1.0, 2.0], [95.0, 2.0]];
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Waypoint { index: 1, .. })
    ));

    let mut cfg = Config::default();
    cfg.node.retry_delay_min_secs = 90;
    assert_eq!(
        cfg.validate(),
        Err(ConfigError::RetryWindow { min: 90, max: 80 })
    );

    let mut cfg = Config::default();
    cfg.node.node_id = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::BroadcastNodeId));
}

#[test]
fn missing_file_is_an_error() {
    let result = tokio_test::block_on(Config::load("/nonexistent/amulink.toml"));
    assert_err!(result);
}
