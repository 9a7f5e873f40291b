//! Simulated serial document reader.
//!
//! [`MockSerialConnector`] answers the reader's request packets the way the
//! firmware does, but only on a link opened at the device's baud rate. Tests
//! drive it through a [`MockSerialHandle`].

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{HardwareError, Result};
use crate::serial::{SerialPacket, command};
use crate::traits::{SerialConnector, SerialLink};

pub const MOCK_VERSION: &str = "MOCK-1.0";
pub const MOCK_SERIAL_NUMBER: &str = "MOCK-SN-0001";

#[derive(Debug)]
struct DeviceState {
    ports: HashSet<String>,
    device_baud: u32,
    opened_bauds: Vec<u32>,
    dtr: bool,
    continuous: bool,
    inbound: VecDeque<u8>,
    read_errors: u32,
    inquiry_response: Option<String>,
    written: Vec<u8>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            ports: HashSet::new(),
            device_baud: 9600,
            opened_bauds: Vec::new(),
            dtr: false,
            continuous: false,
            inbound: VecDeque::new(),
            read_errors: 0,
            inquiry_response: None,
            written: Vec::new(),
        }
    }
}

impl DeviceState {
    fn respond(&mut self, packet: &SerialPacket) {
        let answer = match packet.command {
            command::VERSION => Some(MOCK_VERSION.as_bytes().to_vec()),
            command::SERIAL_NUMBER => Some(MOCK_SERIAL_NUMBER.as_bytes().to_vec()),
            command::INQUIRY => self.inquiry_response.as_ref().map(|s| s.as_bytes().to_vec()),
            command::CONTINUOUS => {
                self.continuous = packet.payload.first() == Some(&1);
                None
            }
            _ => None,
        };
        if let Some(payload) = answer {
            self.inbound
                .extend(SerialPacket::new(packet.command, payload).encode());
        }
    }
}

/// Serial connector backed by one simulated reader.
///
/// # Examples
///
/// ```
/// use scanrelay_hardware::mock::MockSerialConnector;
/// use scanrelay_hardware::traits::SerialConnector;
///
/// let (connector, handle) = MockSerialConnector::new();
/// handle.add_port("/dev/ttyUSB0");
/// assert!(connector.port_exists("/dev/ttyUSB0"));
/// ```
#[derive(Debug, Clone)]
pub struct MockSerialConnector {
    state: Arc<Mutex<DeviceState>>,
}

impl MockSerialConnector {
    pub fn new() -> (Self, MockSerialHandle) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockSerialHandle { state },
        )
    }
}

impl SerialConnector for MockSerialConnector {
    fn port_exists(&self, port: &str) -> bool {
        self.state.lock().ports.contains(port)
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>> {
        let mut state = self.state.lock();
        if !state.ports.contains(port) {
            return Err(HardwareError::disconnected(port));
        }
        state.opened_bauds.push(baud_rate);
        state.inbound.clear();
        Ok(Box::new(MockSerialLink {
            state: Arc::clone(&self.state),
            baud_rate,
        }))
    }
}

struct MockSerialLink {
    state: Arc<Mutex<DeviceState>>,
    baud_rate: u32,
}

impl SerialLink for MockSerialLink {
    fn bytes_available(&mut self) -> Result<usize> {
        let mut state = self.state.lock();
        if state.read_errors > 0 {
            state.read_errors -= 1;
            return Err(HardwareError::communication("simulated read failure"));
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let mut rest = data;
        while let Ok(Some((packet, used))) = SerialPacket::decode(rest) {
            state.written.push(packet.command);
            // Garbled at the wrong baud rate.
            if self.baud_rate == state.device_baud {
                state.respond(&packet);
            }
            rest = &rest[used..];
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.state.lock().dtr = level;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.state.lock().inbound.clear();
        Ok(())
    }
}

/// Controls a [`MockSerialConnector`].
#[derive(Debug, Clone)]
pub struct MockSerialHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl MockSerialHandle {
    pub fn add_port(&self, port: &str) {
        self.state.lock().ports.insert(port.to_string());
    }

    pub fn remove_port(&self, port: &str) {
        self.state.lock().ports.remove(port);
    }

    /// The only baud rate the device answers at. Defaults to 9600.
    pub fn set_device_baud(&self, baud_rate: u32) {
        self.state.lock().device_baud = baud_rate;
    }

    pub fn opened_bauds(&self) -> Vec<u32> {
        self.state.lock().opened_bauds.clone()
    }

    pub fn dtr(&self) -> bool {
        self.state.lock().dtr
    }

    pub fn continuous_enabled(&self) -> bool {
        self.state.lock().continuous
    }

    /// Queue a packet as if the device had sent it.
    pub fn push_packet(&self, packet: SerialPacket) {
        self.state.lock().inbound.extend(packet.encode());
    }

    /// Queue an inquiry packet carrying `text` as the device sends it, rows
    /// ending in a bare CR.
    pub fn push_mrz(&self, text: &str) {
        self.push_packet(SerialPacket::new(command::INQUIRY, text.as_bytes().to_vec()));
    }

    /// Fail the next `count` availability checks.
    pub fn inject_read_errors(&self, count: u32) {
        self.state.lock().read_errors += count;
    }

    /// Text returned for an inquiry request. Without one, inquiries go
    /// unanswered.
    pub fn set_inquiry_response(&self, text: &str) {
        self.state.lock().inquiry_response = Some(text.to_string());
    }

    /// Command bytes of every packet written to the device.
    pub fn written_commands(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }
}
