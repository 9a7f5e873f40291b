//! Types shared by the reader backends and the supervisor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Something a backend reports to its supervisor.
///
/// Backends may produce these from a driver-owned thread; they only ever
/// post to the supervisor's channel and never run processing themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Raw MRZ text from one scan, rows separated by the device's separator.
    RawData(String),

    /// The device reported a change in connectivity.
    ConnectionChanged(bool),
}

/// Concrete transport of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Vendor USB-HID protocol.
    Hid,
    /// Serial/COM packet protocol.
    Serial,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hid => write!(f, "HID"),
            Self::Serial => write!(f, "Serial"),
        }
    }
}

/// Descriptive metadata of a connected reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Product name, e.g. "IDBox OCR" or the HID product string.
    pub name: String,

    pub backend: BackendKind,

    pub serial_number: Option<String>,

    pub firmware_version: Option<String>,
}

impl ReaderInfo {
    pub fn new(name: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            name: name.into(),
            backend,
            serial_number: None,
            firmware_version: None,
        }
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_info_builder() {
        let info = ReaderInfo::new("IDBox OCR", BackendKind::Serial)
            .with_serial_number("SN-0042")
            .with_firmware_version("2.14");

        assert_eq!(info.name, "IDBox OCR");
        assert_eq!(info.backend, BackendKind::Serial);
        assert_eq!(info.serial_number.as_deref(), Some("SN-0042"));
        assert_eq!(info.firmware_version.as_deref(), Some("2.14"));
    }

    #[test]
    fn test_backend_kind_serde() {
        assert_eq!(serde_json::to_string(&BackendKind::Hid).unwrap(), "\"hid\"");
        let kind: BackendKind = serde_json::from_str("\"serial\"").unwrap();
        assert_eq!(kind, BackendKind::Serial);
        assert_eq!(kind.to_string(), "Serial");
    }
}
