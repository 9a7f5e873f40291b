//! Backend dispatch and selection.
//!
//! Native `async fn` in traits is not object-safe, so the supervisor holds an
//! [`AnyReader`] and dispatches by `match`.
//!
//! # Examples
//!
//! ```
//! use scanrelay_hardware::devices::{AnyReader, ReaderDrivers, select_backend};
//! use scanrelay_hardware::mock::{MockSerialConnector, MockVendorSdk};
//! use scanrelay_hardware::{BackendKind, ReaderSettings};
//! use std::sync::Arc;
//!
//! let (sdk, _sdk_handle) = MockVendorSdk::new();
//! let (serial, serial_handle) = MockSerialConnector::new();
//! serial_handle.add_port("COM3");
//!
//! let drivers = ReaderDrivers::new(Arc::new(sdk), Arc::new(serial));
//! let settings = ReaderSettings {
//!     serial_port: "COM3".to_string(),
//!     ..ReaderSettings::default()
//! };
//!
//! let reader = select_backend(&settings, &drivers).unwrap();
//! assert_eq!(reader.backend(), BackendKind::Serial);
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{BackendPreference, ReaderSettings};
use crate::error::{HardwareError, Result};
use crate::hid::{HidReader, HidSettings};
use crate::serial::{SerialReader, SerialSettings};
use crate::traits::{
    ConnectionCallback, DataCallback, HidDescriptor, ReaderBackend, SdkHandle, SerialConnector,
    SerialLink, VendorSdk,
};
use crate::types::{BackendKind, ReaderEvent, ReaderInfo};

#[derive(Debug)]
pub enum AnyReader {
    Hid(HidReader),
    Serial(SerialReader),
}

impl AnyReader {
    pub fn backend(&self) -> BackendKind {
        self.kind()
    }
}

impl ReaderBackend for AnyReader {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Hid(reader) => reader.kind(),
            Self::Serial(reader) => reader.kind(),
        }
    }

    async fn connect(&mut self, events: mpsc::Sender<ReaderEvent>) -> bool {
        match self {
            Self::Hid(reader) => reader.connect(events).await,
            Self::Serial(reader) => reader.connect(events).await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Self::Hid(reader) => reader.disconnect().await,
            Self::Serial(reader) => reader.disconnect().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Hid(reader) => reader.is_connected(),
            Self::Serial(reader) => reader.is_connected(),
        }
    }

    async fn set_scanning(&mut self, enable: bool) -> Result<()> {
        match self {
            Self::Hid(reader) => reader.set_scanning(enable).await,
            Self::Serial(reader) => reader.set_scanning(enable).await,
        }
    }

    async fn trigger_scan(&mut self) -> Result<()> {
        match self {
            Self::Hid(reader) => reader.trigger_scan().await,
            Self::Serial(reader) => reader.trigger_scan().await,
        }
    }

    async fn info(&self) -> Result<ReaderInfo> {
        match self {
            Self::Hid(reader) => reader.info().await,
            Self::Serial(reader) => reader.info().await,
        }
    }
}

impl From<HidReader> for AnyReader {
    fn from(reader: HidReader) -> Self {
        Self::Hid(reader)
    }
}

impl From<SerialReader> for AnyReader {
    fn from(reader: SerialReader) -> Self {
        Self::Serial(reader)
    }
}

/// The outside-world collaborators the backends are built on.
#[derive(Clone)]
pub struct ReaderDrivers {
    pub vendor_sdk: Arc<dyn VendorSdk>,
    pub serial: Arc<dyn SerialConnector>,
}

impl std::fmt::Debug for ReaderDrivers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderDrivers").finish_non_exhaustive()
    }
}

impl ReaderDrivers {
    pub fn new(vendor_sdk: Arc<dyn VendorSdk>, serial: Arc<dyn SerialConnector>) -> Self {
        Self { vendor_sdk, serial }
    }

    /// Drivers for the real hardware compiled into this build.
    ///
    /// Transports whose feature is disabled are replaced by drivers that
    /// never find a device.
    pub fn system() -> Self {
        #[cfg(feature = "hardware-usb")]
        let vendor_sdk: Arc<dyn VendorSdk> = Arc::new(crate::hidapi_sdk::HidApiSdk::new());
        #[cfg(not(feature = "hardware-usb"))]
        let vendor_sdk: Arc<dyn VendorSdk> = Arc::new(NoVendorSdk);

        #[cfg(feature = "hardware-serial")]
        let serial: Arc<dyn SerialConnector> = Arc::new(crate::serial::SystemSerialConnector);
        #[cfg(not(feature = "hardware-serial"))]
        let serial: Arc<dyn SerialConnector> = Arc::new(NoSerialPorts);

        Self { vendor_sdk, serial }
    }
}

/// Build the backend named by `settings`.
///
/// With [`BackendPreference::Auto`] the serial backend wins when its port is
/// configured and present; otherwise HID is used, whether or not a device
/// enumerates right now, so the supervisor keeps retrying it.
///
/// # Errors
/// `HardwareError::ConfigurationError` when the settings are invalid.
pub fn select_backend(settings: &ReaderSettings, drivers: &ReaderDrivers) -> Result<AnyReader> {
    settings.validate()?;

    let hid = || {
        AnyReader::Hid(HidReader::new(
            Arc::clone(&drivers.vendor_sdk),
            HidSettings::from(settings),
        ))
    };
    let serial = || {
        AnyReader::Serial(SerialReader::new(
            Arc::clone(&drivers.serial),
            SerialSettings::from(settings),
        ))
    };

    let reader = match settings.backend {
        BackendPreference::Hid => hid(),
        BackendPreference::Serial => serial(),
        BackendPreference::Auto => {
            if settings.serial_port_configured()
                && drivers.serial.port_exists(settings.serial_port.trim())
            {
                serial()
            } else {
                if settings.serial_port_configured() {
                    warn!(port = %settings.serial_port, "Configured serial port not present, using HID");
                }
                hid()
            }
        }
    };

    info!(backend = %reader.backend(), preference = ?settings.backend, "Reader backend selected");
    Ok(reader)
}

/// Stand-in when USB support is not compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVendorSdk;

impl VendorSdk for NoVendorSdk {
    fn init(&self) -> bool {
        warn!("USB-HID support not compiled in (feature \"hardware-usb\")");
        false
    }

    fn enumerate(&self, _vendor_id: u16, _product_id: u16) -> Option<Vec<HidDescriptor>> {
        None
    }

    fn open(&self, _vendor_id: u16, _product_id: u16) -> Option<SdkHandle> {
        None
    }

    fn close(&self, _handle: SdkHandle) {}

    fn register_data_callback(&self, _handle: SdkHandle, _callback: DataCallback) -> bool {
        false
    }

    fn register_connection_callback(
        &self,
        _handle: SdkHandle,
        _callback: ConnectionCallback,
    ) -> bool {
        false
    }

    fn unregister_callbacks(&self, _handle: SdkHandle) {}

    fn exit(&self) {}
}

/// Stand-in when serial support is not compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSerialPorts;

impl SerialConnector for NoSerialPorts {
    fn port_exists(&self, _port: &str) -> bool {
        false
    }

    fn open(&self, port: &str, _baud_rate: u32) -> Result<Box<dyn SerialLink>> {
        Err(HardwareError::unsupported(format!(
            "serial port {port}: serial support not compiled in"
        )))
    }
}
