//! Reader-side settings.
//!
//! Every field has a default, so a TOML `[reader]` table only needs the
//! values that differ. Durations are whole seconds.

use scanrelay_core::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PRODUCT_ID, DEFAULT_READER_RECONNECT_SECS,
    DEFAULT_VENDOR_ID,
};
use scanrelay_core::duration_secs;
use scanrelay_mrz::RowSeparator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HardwareError, Result};

/// Which backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Serial if its port is present, else HID if the device enumerates,
    /// else HID.
    #[default]
    Auto,
    Hid,
    Serial,
}

/// How the serial backend obtains scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialMode {
    /// The device sends frames unsolicited; a background loop reads them.
    #[default]
    Push,
    /// Scans only happen on an explicit inquiry.
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Template XML; the bundled set is used when unset.
    pub template_file: Option<PathBuf>,

    pub backend: BackendPreference,

    pub row_separator: RowSeparator,

    /// Serial port name. Empty means not configured.
    pub serial_port: String,

    pub serial_mode: SerialMode,

    /// Baud rates to try, in order.
    pub baud_rates: Vec<u32>,

    pub vendor_id: u16,

    pub product_id: u16,

    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,

    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            template_file: None,
            backend: BackendPreference::Auto,
            row_separator: RowSeparator::CrLf,
            serial_port: String::new(),
            serial_mode: SerialMode::Push,
            baud_rates: vec![9600, 115_200],
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            reconnect_interval: Duration::from_secs(DEFAULT_READER_RECONNECT_SECS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReaderSettings {
    pub fn serial_port_configured(&self) -> bool {
        !self.serial_port.trim().is_empty()
    }

    /// Reject combinations that can never connect.
    ///
    /// # Errors
    /// Returns `HardwareError::ConfigurationError` describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendPreference::Serial && !self.serial_port_configured() {
            return Err(HardwareError::configuration(
                "backend = \"serial\" requires serial_port",
            ));
        }
        if self.serial_port_configured() && self.baud_rates.is_empty() {
            return Err(HardwareError::configuration("baud_rates must not be empty"));
        }
        if self.baud_rates.contains(&0) {
            return Err(HardwareError::configuration("baud rate 0 is invalid"));
        }
        if self.reconnect_interval.is_zero() {
            return Err(HardwareError::configuration(
                "reconnect_interval must be at least one second",
            ));
        }
        Ok(())
    }
}
