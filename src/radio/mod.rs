//! # Radio link
//!
//! Line-oriented plumbing between the application and an AT-commanded LoRa modem. The port is
//! shared behind `Arc<Mutex<..>>` by two tasks:
//!
//! - [`RadioReader`] polls the port, frames bytes into lines and forwards every line, housekeeping
//!   included, to whoever owns the line receiver.
//! - [`RadioWriter`] drains the outbound queue of [`OutgoingFrame`]s, encodes them and writes them
//!   with a minimum gap between transmissions (the modem is half duplex).
//!
//! Both tasks stop on [`ControlMessage::Shutdown`]. [`RadioTasks::shutdown`] joins them within a
//! grace period and aborts stragglers, so the port is dropped exactly once.
//!
//! Backends implement [`RadioPort`]: a real serial device ([`serial`], behind the `serial`
//! feature) or the in-process [`loopback::SimulatedAir`].
//!
//! ```rust,no_run
//! use amulink::radio::{create_reader_writer_system, loopback::SimulatedAir, OutgoingFrame, WriterTuning};
//!
//! # async fn demo() {
//! let air = SimulatedAir::default();
//! let link = create_reader_writer_system(Box::new(air.attach(4)), WriterTuning::default()).spawn();
//! let (outgoing, mut lines, tasks) = link.into_parts();
//! outgoing.send(OutgoingFrame::send(1, "REG:4")).ok();
//! let _ok = lines.recv().await;
//! tasks.shutdown(std::time::Duration::from_millis(500)).await;
//! # }
//! ```

pub mod lines;
pub mod loopback;
#[cfg(feature = "serial")]
pub mod serial;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::config::RadioConfig;
use crate::logutil::escape_log;
use crate::protocol::codec::{self, ModemLine};

use lines::LineFramer;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio transport unavailable on {port}: {reason}")]
    TransportUnavailable { port: String, reason: String },

    #[error("radio link closed")]
    LinkClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Byte-level access to a modem. Reads must not block for long: the port mutex is held for the
/// duration of a read, and the writer needs it too.
pub trait RadioPort: Send {
    /// Read whatever is available. `Ok(0)` means nothing pending.
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()>;

    fn name(&self) -> &str;
}

pub type SharedPort = Arc<Mutex<Box<dyn RadioPort>>>;

fn lock_port(port: &SharedPort) -> MutexGuard<'_, Box<dyn RadioPort>> {
    port.lock().unwrap_or_else(|e| e.into_inner())
}

/// Something for the writer task to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingFrame {
    /// Application payload addressed to another modem.
    Send { dest: u16, payload: String },
    /// Raw modem directive, already terminated.
    Command(String),
}

impl OutgoingFrame {
    pub fn send(dest: u16, payload: impl Into<String>) -> Self {
        OutgoingFrame::Send {
            dest,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            OutgoingFrame::Send { dest, payload } => codec::encode_send(*dest, payload),
            OutgoingFrame::Command(raw) => raw.clone(),
        }
    }

    fn is_transmission(&self) -> bool {
        matches!(self, OutgoingFrame::Send { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

/// Pacing knobs for the radio tasks.
#[derive(Debug, Clone)]
pub struct WriterTuning {
    /// Minimum gap between two `AT+SEND` transmissions. Commands are not paced.
    pub min_send_gap: Duration,
    /// How often the reader polls the port.
    pub read_poll: Duration,
}

impl Default for WriterTuning {
    fn default() -> Self {
        Self {
            min_send_gap: Duration::from_millis(150),
            read_poll: Duration::from_millis(10),
        }
    }
}

impl From<&RadioConfig> for WriterTuning {
    fn from(cfg: &RadioConfig) -> Self {
        Self {
            min_send_gap: Duration::from_millis(cfg.min_send_gap_ms),
            read_poll: Duration::from_millis(cfg.read_poll_ms.max(1)),
        }
    }
}

/// Address, network and band programmed into the modem at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemSettings {
    pub address: u16,
    pub network_id: u8,
    pub band: u32,
}

impl ModemSettings {
    /// Setting directives followed by the matching queries.
    pub fn setup_commands(&self) -> Vec<String> {
        vec![
            codec::encode_command("ADDRESS", self.address),
            codec::encode_command("NETWORKID", self.network_id),
            codec::encode_command("BAND", self.band),
            codec::encode_query("ADDRESS"),
            codec::encode_query("NETWORKID"),
            codec::encode_query("BAND"),
        ]
    }
}

/// Send the setup sequence and swallow the modem's replies for `settle` so the session starts
/// with a clean input stream. Returns the lines seen.
pub async fn configure_modem(
    outgoing: &mpsc::UnboundedSender<OutgoingFrame>,
    lines: &mut mpsc::UnboundedReceiver<String>,
    settings: &ModemSettings,
    settle: Duration,
) -> Result<Vec<String>, RadioError> {
    for cmd in settings.setup_commands() {
        outgoing
            .send(OutgoingFrame::Command(cmd))
            .map_err(|_| RadioError::LinkClosed)?;
    }
    let replies = drain_lines(lines, settle).await;
    for reply in &replies {
        match codec::classify(reply) {
            ModemLine::Error(code) => warn!("Modem rejected a setup directive: +ERR={}", code),
            _ => debug!("Modem setup reply: {}", escape_log(reply)),
        }
    }
    info!(
        "Radio configured: ADDRESS={}, NETWORKID={}, BAND={}",
        settings.address, settings.network_id, settings.band
    );
    Ok(replies)
}

/// Collect every line that arrives within `window`.
pub async fn drain_lines(
    lines: &mut mpsc::UnboundedReceiver<String>,
    window: Duration,
) -> Vec<String> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(Some(line)) = tokio::time::timeout_at(deadline, lines.recv()).await {
        seen.push(line);
    }
    seen
}

/// Open the configured transport. Failure is fatal to startup and is logged here.
pub async fn open_port(cfg: &RadioConfig) -> Result<Box<dyn RadioPort>, RadioError> {
    let opened = open_backend(cfg).await;
    if let Err(e) = &opened {
        error!("Cannot start without a radio: {}", e);
    }
    opened
}

async fn open_backend(cfg: &RadioConfig) -> Result<Box<dyn RadioPort>, RadioError> {
    #[cfg(feature = "serial")]
    {
        let port = serial::SerialRadio::open(&cfg.port, cfg.baud_rate).await?;
        Ok(Box::new(port))
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(RadioError::TransportUnavailable {
            port: cfg.port.clone(),
            reason: "built without the 'serial' feature".to_string(),
        })
    }
}

/// Reader task: port bytes to lines.
pub struct RadioReader {
    port: SharedPort,
    framer: LineFramer,
    line_tx: mpsc::UnboundedSender<String>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    poll: Duration,
}

impl RadioReader {
    pub fn new(
        port: SharedPort,
        line_tx: mpsc::UnboundedSender<String>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        poll: Duration,
    ) -> Self {
        Self {
            port,
            framer: LineFramer::new(),
            line_tx,
            control_rx,
            poll,
        }
    }

    pub async fn run(mut self) {
        debug!("Starting radio reader task");
        let mut interval = tokio::time::interval(self.poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlMessage::Shutdown) => {
                            debug!("Reader task received shutdown signal");
                            break;
                        }
                        None => {
                            warn!("Control channel closed, shutting down reader");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    match self.read_and_forward() {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!("Line consumer dropped, shutting down reader");
                            break;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                            debug!("Reader interrupted, likely shutdown in progress");
                            break;
                        }
                        Err(e) => {
                            error!("Reader error: {} - continuing operation", e);
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
        debug!("Radio reader task shutting down");
    }

    /// Returns `Ok(false)` once nobody is listening for lines any more.
    fn read_and_forward(&mut self) -> std::io::Result<bool> {
        let mut buffer = [0u8; 512];
        let read_result = {
            let mut port = lock_port(&self.port);
            port.read_chunk(&mut buffer)
        };
        match read_result {
            Ok(n) if n > 0 => self.framer.push(&buffer[..n]),
            Ok(_) => return Ok(true),
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                return Ok(true)
            }
            Err(e) => return Err(e),
        }
        for line in self.framer.drain_lines() {
            trace!("RX line: {}", escape_log(&line));
            if self.line_tx.send(line).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Writer task: outbound queue to port.
pub struct RadioWriter {
    port: SharedPort,
    outgoing_rx: mpsc::UnboundedReceiver<OutgoingFrame>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    tuning: WriterTuning,
    last_send: Option<Instant>,
}

impl RadioWriter {
    pub fn new(
        port: SharedPort,
        outgoing_rx: mpsc::UnboundedReceiver<OutgoingFrame>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        tuning: WriterTuning,
    ) -> Self {
        Self {
            port,
            outgoing_rx,
            control_rx,
            tuning,
            last_send: None,
        }
    }

    pub async fn run(mut self) {
        debug!("Starting radio writer task");
        loop {
            tokio::select! {
                frame = self.outgoing_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.write_frame(&frame).await {
                                error!("Failed to write to radio: {}", e);
                            }
                        }
                        None => {
                            debug!("Outgoing channel closed, shutting down writer");
                            break;
                        }
                    }
                }
                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlMessage::Shutdown) => {
                            debug!("Writer task received shutdown signal");
                            break;
                        }
                        None => {
                            warn!("Control channel closed, shutting down writer");
                            break;
                        }
                    }
                }
            }
        }
        debug!("Radio writer task shutting down");
    }

    async fn write_frame(&mut self, frame: &OutgoingFrame) -> std::io::Result<()> {
        if frame.is_transmission() {
            if let Some(last) = self.last_send {
                let since = last.elapsed();
                if since < self.tuning.min_send_gap {
                    let wait = self.tuning.min_send_gap - since;
                    trace!("Pacing transmission by {}ms", wait.as_millis());
                    sleep(wait).await;
                }
            }
        }
        let encoded = frame.encode();
        debug!("TX: {}", escape_log(&encoded));
        {
            let mut port = lock_port(&self.port);
            port.write_chunk(encoded.as_bytes())?;
        }
        if frame.is_transmission() {
            self.last_send = Some(Instant::now());
        }
        Ok(())
    }
}

/// Reader and writer built around one shared port, not yet running.
pub struct RadioSystem {
    pub reader: RadioReader,
    pub writer: RadioWriter,
    pub lines_rx: mpsc::UnboundedReceiver<String>,
    pub outgoing_tx: mpsc::UnboundedSender<OutgoingFrame>,
    pub reader_control_tx: mpsc::UnboundedSender<ControlMessage>,
    pub writer_control_tx: mpsc::UnboundedSender<ControlMessage>,
    port_name: String,
}

/// Wire up reader and writer tasks around `port`.
pub fn create_reader_writer_system(port: Box<dyn RadioPort>, tuning: WriterTuning) -> RadioSystem {
    let port_name = port.name().to_string();
    let shared: SharedPort = Arc::new(Mutex::new(port));

    let (line_tx, lines_rx) = mpsc::unbounded_channel::<String>();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<OutgoingFrame>();
    let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel::<ControlMessage>();
    let (writer_control_tx, writer_control_rx) = mpsc::unbounded_channel::<ControlMessage>();

    let reader = RadioReader::new(shared.clone(), line_tx, reader_control_rx, tuning.read_poll);
    let writer = RadioWriter::new(shared, outgoing_rx, writer_control_rx, tuning);

    RadioSystem {
        reader,
        writer,
        lines_rx,
        outgoing_tx,
        reader_control_tx,
        writer_control_tx,
        port_name,
    }
}

impl RadioSystem {
    pub fn spawn(self) -> RadioLink {
        info!("Radio link up on {}", self.port_name);
        let reader = tokio::spawn(self.reader.run());
        let writer = tokio::spawn(self.writer.run());
        RadioLink {
            outgoing: self.outgoing_tx,
            lines: self.lines_rx,
            tasks: RadioTasks {
                reader,
                writer,
                reader_control: self.reader_control_tx,
                writer_control: self.writer_control_tx,
                port_name: self.port_name,
            },
        }
    }
}

/// A running radio link.
pub struct RadioLink {
    pub outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    pub lines: mpsc::UnboundedReceiver<String>,
    pub tasks: RadioTasks,
}

impl RadioLink {
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<OutgoingFrame>,
        mpsc::UnboundedReceiver<String>,
        RadioTasks,
    ) {
        (self.outgoing, self.lines, self.tasks)
    }
}

pub struct RadioTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    reader_control: mpsc::UnboundedSender<ControlMessage>,
    writer_control: mpsc::UnboundedSender<ControlMessage>,
    port_name: String,
}

impl RadioTasks {
    /// Stop both tasks, waiting at most `grace` for each before aborting it. The shared port is
    /// released when the last task handle goes away.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.reader_control.send(ControlMessage::Shutdown);
        let _ = self.writer_control.send(ControlMessage::Shutdown);
        join_within("writer", self.writer, grace).await;
        join_within("reader", self.reader, grace).await;
        info!("Radio port {} released", self.port_name);
    }
}

async fn join_within(name: &str, mut handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Radio {} task ended abnormally: {}", name, e),
        Err(_) => {
            warn!(
                "Radio {} task did not stop within {}ms; aborting",
                name,
                grace.as_millis()
            );
            handle.abort();
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::SimulatedAir;
    use super::*;

    fn clear_input(fail: bool) -> Result<(), RadioError> {
        if fail {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device gone"))?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_device_is_transport_unavailable() {
        let cfg = RadioConfig {
            port: "/nonexistent/amulink-tty".to_string(),
            ..RadioConfig::default()
        };
        match open_port(&cfg).await {
            Err(RadioError::TransportUnavailable { port, .. }) => {
                assert_eq!(port, "/nonexistent/amulink-tty")
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("opened a device that does not exist"),
        }
    }

    #[test]
    fn io_failures_surface_as_radio_errors() {
        assert!(clear_input(false).is_ok());
        match clear_input(true) {
            Err(RadioError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {:?}", other),
        }
        let err = clear_input(true).expect_err("fails");
        assert_eq!(err.to_string(), "device gone");
    }

    #[test]
    fn setup_sequence_sets_then_queries() {
        let settings = ModemSettings {
            address: 4,
            network_id: 6,
            band: 915_000_000,
        };
        assert_eq!(
            settings.setup_commands(),
            vec![
                "AT+ADDRESS=4\r\n",
                "AT+NETWORKID=6\r\n",
                "AT+BAND=915000000\r\n",
                "AT+ADDRESS?\r\n",
                "AT+NETWORKID?\r\n",
                "AT+BAND?\r\n",
            ]
        );
    }

    #[test]
    fn outgoing_frames_encode() {
        assert_eq!(OutgoingFrame::send(1, "REG:4").encode(), "AT+SEND=1,5,REG:4\r\n");
        assert_eq!(OutgoingFrame::Command("AT\r\n".into()).encode(), "AT\r\n");
    }

    #[tokio::test]
    async fn link_round_trips_through_simulated_air() {
        let air = SimulatedAir::default();
        let base_port = air.attach(1);
        let node_port = air.attach(4);
        let tuning = WriterTuning {
            min_send_gap: Duration::ZERO,
            read_poll: Duration::from_millis(2),
        };
        let (node_out, mut node_lines, node_tasks) =
            create_reader_writer_system(Box::new(node_port), tuning.clone())
                .spawn()
                .into_parts();
        let (_base_out, mut base_lines, base_tasks) =
            create_reader_writer_system(Box::new(base_port), tuning)
                .spawn()
                .into_parts();

        node_out.send(OutgoingFrame::send(1, "REG:4")).expect("queue");
        let ok = tokio::time::timeout(Duration::from_secs(1), node_lines.recv())
            .await
            .expect("reply in time");
        assert_eq!(ok.as_deref(), Some("+OK"));
        let rcv = tokio::time::timeout(Duration::from_secs(1), base_lines.recv())
            .await
            .expect("frame in time")
            .expect("line");
        let frame = codec::decode_received(&rcv).expect("decodes");
        assert_eq!(frame.sender, 4);
        assert_eq!(frame.payload, "REG:4");

        node_tasks.shutdown(Duration::from_millis(500)).await;
        base_tasks.shutdown(Duration::from_millis(500)).await;
    }
}
