//! # Amulink - reliable waypoint delivery over LoRa AT modems
//!
//! Amulink moves short telemetry messages between mobile field units ("nodes") and a fixed base
//! station over half-duplex LoRa modems driven by text AT commands on a serial line. The radio
//! gives no delivery guarantee, so every node message is acknowledged by the base station and
//! retried with randomized exponential backoff until it is acknowledged or the attempt cap is hit.
//!
//! ## Features
//!
//! - **AT Modem Link**: reader/writer tasks around a shared serial port with line framing and
//!   half-duplex transmit pacing.
//! - **Registration Handshake**: `REG:<id>` / `ACKREG:<id>` before any route reporting.
//! - **Waypoint Delivery**: `<id>:<index>:<lat>,<lon>` / `ACK:<id>:<index>` with per-attempt
//!   timeouts and bounded retries.
//! - **Base Station**: stateless acknowledgment, fleet tracking and periodic summaries.
//! - **Mission Records**: one record per attempt (node) or per frame (base) to the log and an
//!   optional CSV file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use amulink::config::Config;
//! use amulink::mission::LogSink;
//! use amulink::node::NodeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let port = amulink::radio::open_port(&config.radio).await?;
//!     let report = NodeRuntime::new(config, Arc::new(LogSink)).run(port).await?;
//!     println!("delivered {:?}", report.delivered);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - modem directives and application payloads
//! - [`radio`] - port abstraction, reader/writer tasks, serial and simulated backends
//! - [`node`] - registration and waypoint delivery with acknowledgment correlation
//! - [`station`] - base station dispatch and fleet registry
//! - [`mission`] - delivery records and their sinks
//! - [`config`] - configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  NodeSession    │     │   Dispatcher    │ ← application logic
//! │  + Listener     │     │   + Fleet       │
//! └─────────────────┘     └─────────────────┘
//!          │                       │
//! ┌─────────────────┐     ┌─────────────────┐
//! │  Radio reader/  │ ~~~ │  Radio reader/  │ ← AT modem link
//! │  writer tasks   │     │  writer tasks   │
//! └─────────────────┘     └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod mission;
pub mod node;
pub mod protocol;
pub mod radio;
pub mod station;
