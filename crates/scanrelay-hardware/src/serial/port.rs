//! Operating-system serial ports through `serialport`.

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{HardwareError, Result};
use crate::traits::{SerialConnector, SerialLink};

const PORT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Opens real COM/tty ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerialConnector;

impl SerialConnector for SystemSerialConnector {
    fn port_exists(&self, port: &str) -> bool {
        match serialport::available_ports() {
            Ok(ports) => ports.iter().any(|p| p.port_name.eq_ignore_ascii_case(port)),
            // Enumeration is not available everywhere; let open decide.
            Err(_) => std::path::Path::new(port).exists(),
        }
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>> {
        let inner = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| HardwareError::communication(format!("open {port}: {e}")))?;
        Ok(Box::new(SystemSerialLink { inner }))
    }
}

struct SystemSerialLink {
    inner: Box<dyn SerialPort>,
}

fn port_error(e: serialport::Error) -> HardwareError {
    HardwareError::communication(e.to_string())
}

impl SerialLink for SystemSerialLink {
    fn bytes_available(&mut self) -> Result<usize> {
        self.inner
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(port_error)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf)?)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(self.inner.flush()?)
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.inner
            .write_data_terminal_ready(level)
            .map_err(port_error)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inner.clear(ClearBuffer::All).map_err(port_error)
    }
}
