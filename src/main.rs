//! Binary entrypoint for the Amulink CLI.
//!
//! Commands:
//! - `node [--port <path>]` - register with the base station and deliver the configured route
//! - `base [--port <path>]` - run the base station until interrupted
//! - `init` - write a starter `config.toml`
//! - `smoketest [--port <path>] [-b <baud>] [--timeout <s>]` - check the modem answers `AT`
//!
//! See the library crate docs for module-level details: `amulink::`.
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use amulink::config::Config;
use amulink::mission::{CsvSink, DeliverySink, FanoutSink, LogSink, MISSION_TARGET};
use amulink::node::{NodeHandle, NodeRuntime};
use amulink::radio;
use amulink::station::BaseStation;

#[derive(Parser)]
#[command(name = "amulink")]
#[command(about = "Reliable waypoint delivery over AT-commanded LoRa modems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a field node: register, then report every configured waypoint
    Node {
        /// Modem serial port (overrides radio.port)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Run as the base station
    Base {
        /// Modem serial port (overrides radio.port)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Send a bare AT to the modem and report what came back
    SmokeTest {
        /// Modem serial port (overrides radio.port)
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate (overrides radio.baud_rate)
        #[arg(short = 'b', long)]
        baud: Option<u32>,
        /// Seconds to wait for replies
        #[arg(short, long, default_value_t = 3)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(&None, cli.verbose);
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Node { port } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting Amulink node v{}", env!("CARGO_PKG_VERSION"));
            if let Some(port) = port {
                config.radio.port = port;
            }
            let sink = build_sink(config.node.csv_file.as_deref());
            let device = radio::open_port(&config.radio).await?;
            let runtime = NodeRuntime::new(config, sink);
            stop_on_ctrl_c(runtime.handle());
            let report = runtime.run(device).await?;
            if !report.failed.is_empty() {
                warn!("Waypoints not acknowledged: {:?}", report.failed);
            }
        }
        Commands::Base { port } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting Amulink base station v{}", env!("CARGO_PKG_VERSION"));
            if let Some(port) = port {
                config.radio.port = port;
            }
            let sink = build_sink(config.base.csv_file.as_deref());
            let device = radio::open_port(&config.radio).await?;
            let station = BaseStation::new(config, sink);
            stop_on_ctrl_c(station.handle());
            station.run(device).await?;
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            let pre_config = Config::load(&cli.config).await.ok();
            init_logging(&pre_config, cli.verbose);
            let mut radio_cfg = pre_config.map(|c| c.radio).unwrap_or_default();
            if let Some(port) = port {
                radio_cfg.port = port;
            }
            if let Some(baud) = baud {
                radio_cfg.baud_rate = baud;
            }
            let ok = smoke_test(&radio_cfg, timeout).await?;
            std::process::exit(if ok { 0 } else { 1 });
        }
    }

    Ok(())
}

fn build_sink(csv_file: Option<&str>) -> Arc<dyn DeliverySink> {
    let log_sink: Arc<dyn DeliverySink> = Arc::new(LogSink);
    let Some(path) = csv_file else {
        return log_sink;
    };
    match CsvSink::open(path) {
        Ok(csv) => Arc::new(FanoutSink::new(vec![log_sink, Arc::new(csv)])),
        Err(e) => {
            warn!("CSV log {} unavailable ({}); records go to the log only", path, e);
            log_sink
        }
    }
}

fn stop_on_ctrl_c(handle: NodeHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; shutting down");
                handle.stop();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });
}

async fn smoke_test(cfg: &amulink::config::RadioConfig, timeout: u64) -> Result<bool> {
    use amulink::protocol::codec::{self, ModemLine};
    use amulink::radio::{create_reader_writer_system, drain_lines, OutgoingFrame, WriterTuning};
    use std::time::Duration;

    info!("Starting smoke test on {} @ {} baud", cfg.port, cfg.baud_rate);
    let device = radio::open_port(cfg).await?;
    let (outgoing, mut lines, tasks) = create_reader_writer_system(device, WriterTuning::from(cfg))
        .spawn()
        .into_parts();
    let _ = outgoing.send(OutgoingFrame::Command(format!("AT{}", codec::LINE_TERMINATOR)));
    let replies = drain_lines(&mut lines, Duration::from_secs(timeout)).await;
    tasks.shutdown(Duration::from_millis(cfg.shutdown_grace_ms)).await;

    let status_ok = replies
        .iter()
        .any(|l| matches!(codec::classify(l), ModemLine::Ok));
    let payload = serde_json::json!({
        "status": if status_ok { "ok" } else { "no_response" },
        "port": cfg.port,
        "baud": cfg.baud_rate,
        "replies": replies,
        "timeout_seconds": timeout,
    });
    println!("{}", payload);
    Ok(status_ok)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| open_append(path));
    let mission_path = config.as_ref().and_then(|c| c.logging.mission_file.clone());
    let is_tty = atty::is(atty::Stream::Stdout);

    match log_file {
        Some(file) => {
            let write_mutex = Arc::new(std::sync::Mutex::new(file));
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if record.target() == MISSION_TARGET {
                    if let Some(mut mf) = mission_path.as_deref().and_then(open_append) {
                        let _ = writeln!(mf, "{}", line);
                    }
                }

                // Redirected stdout already lands in the log file
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if record.target() == MISSION_TARGET {
                    if let Some(mut mf) = mission_path.as_deref().and_then(open_append) {
                        let _ = writeln!(mf, "{}", line);
                    }
                }
                writeln!(fmt, "{}", line)
            });
        }
    }
    let _ = builder.try_init();
}

fn open_append(path: &str) -> Option<std::fs::File> {
    let path = std::path::Path::new(path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let _ = std::fs::create_dir_all(dir);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}
