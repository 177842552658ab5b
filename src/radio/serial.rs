//! Serial-attached modem backend.

use std::io::{Read, Write};
use std::time::Duration;

use log::debug;
use serialport::SerialPort;
use tokio::time::sleep;

use super::{RadioError, RadioPort};

/// Short read timeout: the reader holds the port mutex while reading.
const READ_TIMEOUT: Duration = Duration::from_millis(20);

pub struct SerialRadio {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialRadio {
    pub async fn open(port_name: &str, baud_rate: u32) -> Result<Self, RadioError> {
        debug!("Opening serial port {} at {} baud", port_name, baud_rate);

        let mut builder = serialport::new(port_name, baud_rate).timeout(READ_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| RadioError::TransportUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(Duration::from_millis(150)).await;

        // Discard whatever the module printed before we attached. A port that cannot do this
        // will not read either.
        port.clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::from)?;

        debug!("Serial port {} initialized", port_name);
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl RadioPort for SerialRadio {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.port.bytes_to_read() {
            Ok(0) => Ok(0),
            Ok(_) => self.port.read(buf),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
