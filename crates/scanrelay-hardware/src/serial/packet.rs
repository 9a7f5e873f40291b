//! Serial reader packet framing.
//!
//! ```text
//! ┌─────────┬──────────────────┬──────────────┐
//! │ command │ length (u16, BE) │ payload ...  │
//! │ 1 byte  │ 2 bytes          │ length bytes │
//! └─────────┴──────────────────┴──────────────┘
//! ```
//!
//! Requests are usually a bare command with zero length; `C` carries one
//! enable byte.

use crate::error::{HardwareError, Result};

pub const HEADER_LEN: usize = 3;

/// Largest payload the reader ever sends. Anything longer is line noise.
pub const MAX_PAYLOAD_LEN: usize = 4096 - HEADER_LEN;

/// Command bytes.
pub mod command {
    /// Inquiry; responses carry MRZ text.
    pub const INQUIRY: u8 = b'I';
    pub const VERSION: u8 = b'V';
    pub const OCR_VERSION: u8 = b'W';
    pub const SERIAL_NUMBER: u8 = b'R';
    pub const PRODUCT_INFO: u8 = b'T';
    /// Continuous (push) mode, payload `[1]` or `[0]`.
    pub const CONTINUOUS: u8 = b'C';
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPacket {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl SerialPacket {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// A request with no payload.
    pub fn request(command: u8) -> Self {
        Self::new(command, Vec::new())
    }

    pub fn continuous(enable: bool) -> Self {
        Self::new(command::CONTINUOUS, vec![u8::from(enable)])
    }

    /// Wire bytes.
    ///
    /// Payloads longer than `u16::MAX` are truncated; nothing in this
    /// protocol comes close.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len().min(u16::MAX as usize);
        let mut out = Vec::with_capacity(HEADER_LEN + len);
        out.push(self.command);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(&self.payload[..len]);
        out
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes it used, or `Ok(None)` when
    /// `buf` does not hold a complete packet yet.
    ///
    /// # Errors
    /// `HardwareError::InvalidData` when the header declares a payload longer
    /// than [`MAX_PAYLOAD_LEN`].
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(HardwareError::invalid_data(format!(
                "declared payload of {len} bytes exceeds {MAX_PAYLOAD_LEN}"
            )));
        }
        let total = HEADER_LEN + len;
        if buf.len() < total {
            return Ok(None);
        }
        let packet = Self::new(buf[0], buf[HEADER_LEN..total].to_vec());
        Ok(Some((packet, total)))
    }

    /// Payload as text, or `None` for packets that carry no text.
    pub fn text(&self) -> Option<String> {
        match self.command {
            command::INQUIRY => Some(mrz_text(&self.payload)),
            command::VERSION
            | command::OCR_VERSION
            | command::SERIAL_NUMBER
            | command::PRODUCT_INFO => {
                Some(String::from_utf8_lossy(&self.payload).trim().to_string())
            }
            _ => None,
        }
    }

    pub fn is_mrz(&self) -> bool {
        self.command == command::INQUIRY
    }
}

/// The reader ends rows with a bare CR; expand to CRLF and drop the
/// trailing blank row.
pub fn mrz_text(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload).replace('\r', "\r\n");
    match text.strip_suffix("\r\n\r\n") {
        Some(trimmed) => trimmed.to_string(),
        None => text,
    }
}

/// Collects bytes across reads and yields whole packets.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buffer: Vec<u8>,
    discarded: usize,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete packet.
    ///
    /// A header with an impossible length loses its first byte and the
    /// search resumes one byte later.
    pub fn next_packet(&mut self) -> Option<SerialPacket> {
        loop {
            match SerialPacket::decode(&self.buffer) {
                Ok(Some((packet, used))) => {
                    self.buffer.drain(..used);
                    return Some(packet);
                }
                Ok(None) => return None,
                Err(_) => {
                    self.buffer.remove(0);
                    self.discarded += 1;
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes dropped while resynchronising.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
