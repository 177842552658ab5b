//! In-process stand-in for a set of modems sharing the air.
//!
//! Each [`LoopbackModem`] attached to a [`SimulatedAir`] understands the directives the crate
//! sends: `AT`, `AT+SEND=..`, `AT+<NAME>=<value>` and `AT+<NAME>?`. A transmission is turned into
//! a `+RCV=` notification on every other modem whose address matches the destination (address 0
//! broadcasts) and whose network id matches the sender's. A drop filter lets tests lose chosen
//! frames the way the real channel does.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::codec::SignalQuality;

use super::lines::LineFramer;
use super::RadioPort;

/// One transmission seen on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    pub from: u16,
    pub to: u16,
    pub payload: String,
    pub dropped: bool,
}

/// Returns true for frames that should be lost.
pub type DropFilter = Arc<dyn Fn(&AirFrame) -> bool + Send + Sync>;

struct Endpoint {
    address: u16,
    settings: HashMap<String, String>,
    inbox: VecDeque<u8>,
}

impl Endpoint {
    fn reply(&mut self, line: &str) {
        self.inbox.extend(line.as_bytes());
        self.inbox.extend(b"\r\n");
    }

    fn network_id(&self) -> Option<&str> {
        self.settings.get("NETWORKID").map(String::as_str)
    }
}

struct AirState {
    endpoints: Vec<Endpoint>,
    quality: SignalQuality,
    drop_filter: Option<DropFilter>,
    history: Vec<AirFrame>,
}

#[derive(Clone)]
pub struct SimulatedAir {
    state: Arc<Mutex<AirState>>,
}

impl Default for SimulatedAir {
    fn default() -> Self {
        Self::new(SignalQuality { rssi: -45, snr: 10 })
    }
}

impl SimulatedAir {
    pub fn new(quality: SignalQuality) -> Self {
        Self {
            state: Arc::new(Mutex::new(AirState {
                endpoints: Vec::new(),
                quality,
                drop_filter: None,
                history: Vec::new(),
            })),
        }
    }

    pub fn with_drop_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&AirFrame) -> bool + Send + Sync + 'static,
    {
        self.lock().drop_filter = Some(Arc::new(filter));
        self
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a modem with an initial address.
    pub fn attach(&self, address: u16) -> LoopbackModem {
        let mut state = self.lock();
        state.endpoints.push(Endpoint {
            address,
            settings: HashMap::new(),
            inbox: VecDeque::new(),
        });
        let id = state.endpoints.len() - 1;
        LoopbackModem {
            air: self.clone(),
            id,
            framer: LineFramer::new(),
            name: format!("loopback:{}", address),
        }
    }

    /// Every transmission so far, dropped ones included.
    pub fn history(&self) -> Vec<AirFrame> {
        self.lock().history.clone()
    }

    /// Push a raw line into every modem listening on `address`, as if the modem printed it.
    pub fn inject(&self, address: u16, line: &str) {
        let mut state = self.lock();
        for ep in state.endpoints.iter_mut().filter(|ep| ep.address == address) {
            ep.reply(line);
        }
    }

    fn handle_directive(&self, id: usize, line: &str) {
        let mut state = self.lock();
        let Some(body) = line.strip_prefix("AT") else {
            state.endpoints[id].reply("+ERR=1");
            return;
        };
        if body.is_empty() {
            state.endpoints[id].reply("+OK");
            return;
        }
        let Some(body) = body.strip_prefix('+') else {
            state.endpoints[id].reply("+ERR=1");
            return;
        };

        if let Some(args) = body.strip_prefix("SEND=") {
            transmit(&mut state, id, args);
        } else if let Some(name) = body.strip_suffix('?') {
            let ep = &mut state.endpoints[id];
            let value = if name == "ADDRESS" {
                Some(ep.address.to_string())
            } else {
                ep.settings.get(name).cloned()
            };
            match value {
                Some(v) => ep.reply(&format!("+{}={}", name, v)),
                None => ep.reply("+ERR=4"),
            }
        } else if let Some((name, value)) = body.split_once('=') {
            let ep = &mut state.endpoints[id];
            if name == "ADDRESS" {
                match value.parse::<u16>() {
                    Ok(addr) => ep.address = addr,
                    Err(_) => {
                        ep.reply("+ERR=4");
                        return;
                    }
                }
            }
            ep.settings.insert(name.to_string(), value.to_string());
            ep.reply("+OK");
        } else {
            state.endpoints[id].reply("+ERR=1");
        }
    }
}

fn transmit(state: &mut AirState, id: usize, args: &str) {
    let mut parts = args.splitn(3, ',');
    let parsed = match (parts.next(), parts.next(), parts.next()) {
        (Some(dest), Some(len), Some(payload)) => dest
            .parse::<u16>()
            .ok()
            .zip(len.parse::<usize>().ok())
            .filter(|(_, len)| *len == payload.len())
            .map(|(dest, _)| (dest, payload.to_string())),
        _ => None,
    };
    let Some((to, payload)) = parsed else {
        state.endpoints[id].reply("+ERR=5");
        return;
    };

    let from = state.endpoints[id].address;
    let mut frame = AirFrame {
        from,
        to,
        payload,
        dropped: false,
    };
    frame.dropped = state
        .drop_filter
        .as_ref()
        .map(|filter| filter(&frame))
        .unwrap_or(false);

    if !frame.dropped {
        let quality = state.quality;
        let network = state.endpoints[id].network_id().map(str::to_string);
        let notification = format!(
            "+RCV={},{},{},{},{}",
            from,
            frame.payload.len(),
            frame.payload,
            quality.rssi,
            quality.snr
        );
        for (other, ep) in state.endpoints.iter_mut().enumerate() {
            let addressed = to == 0 || ep.address == to;
            if other != id && addressed && ep.network_id() == network.as_deref() {
                ep.reply(&notification);
            }
        }
    }
    state.endpoints[id].reply("+OK");
    state.history.push(frame);
}

/// One modem on a [`SimulatedAir`].
pub struct LoopbackModem {
    air: SimulatedAir,
    id: usize,
    framer: LineFramer,
    name: String,
}

impl RadioPort for LoopbackModem {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.air.lock();
        let inbox = &mut state.endpoints[self.id].inbox;
        let n = buf.len().min(inbox.len());
        for (slot, byte) in buf.iter_mut().zip(inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.framer.push(data);
        for line in self.framer.drain_lines() {
            self.air.handle_directive(self.id, &line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(modem: &mut LoopbackModem) -> String {
        let mut buf = [0u8; 1024];
        let n = modem.read_chunk(&mut buf).expect("read");
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn send_is_delivered_with_quality() {
        let air = SimulatedAir::new(SignalQuality { rssi: -70, snr: 3 });
        let mut base = air.attach(1);
        let mut node = air.attach(4);
        node.write_chunk(b"AT+SEND=1,25,4:0:33.686377,-117.789653\r\n")
            .expect("write");
        assert_eq!(read_all(&mut node), "+OK\r\n");
        assert_eq!(
            read_all(&mut base),
            "+RCV=4,25,4:0:33.686377,-117.789653,-70,3\r\n"
        );
    }

    #[test]
    fn address_directive_moves_the_modem() {
        let air = SimulatedAir::default();
        let mut node = air.attach(0);
        node.write_chunk(b"AT+ADDRESS=9\r\nAT+ADDRESS?\r\nAT+BAND?\r\n")
            .expect("write");
        assert_eq!(read_all(&mut node), "+OK\r\n+ADDRESS=9\r\n+ERR=4\r\n");
        air.inject(9, "+READY");
        assert_eq!(read_all(&mut node), "+READY\r\n");
    }

    #[test]
    fn dropped_frames_are_recorded_but_not_delivered() {
        let air = SimulatedAir::default().with_drop_filter(|f| f.payload.starts_with("REG"));
        let mut base = air.attach(1);
        let mut node = air.attach(4);
        node.write_chunk(b"AT+SEND=1,5,REG:4\r\n").expect("write");
        assert_eq!(read_all(&mut base), "");
        let history = air.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].dropped);
        let _ = read_all(&mut node);
    }

    #[test]
    fn network_ids_partition_the_air() {
        let air = SimulatedAir::default();
        let mut base = air.attach(1);
        let mut node = air.attach(4);
        base.write_chunk(b"AT+NETWORKID=6\r\n").expect("write");
        node.write_chunk(b"AT+NETWORKID=7\r\nAT+SEND=1,3,hey\r\n")
            .expect("write");
        assert_eq!(read_all(&mut base), "+OK\r\n");
    }

    #[test]
    fn bad_length_is_rejected() {
        let air = SimulatedAir::default();
        let mut node = air.attach(4);
        node.write_chunk(b"AT+SEND=1,9,REG:4\r\n").expect("write");
        assert_eq!(read_all(&mut node), "+ERR=5\r\n");
    }
}
