//! Document reader hardware for the scanrelay system.
//!
//! Two transports sit behind [`ReaderBackend`]:
//!
//! - [`HidReader`]: vendor USB-HID readers driven through a [`VendorSdk`]
//!   that calls back from its own threads.
//! - [`SerialReader`]: COM/tty readers speaking the command + length +
//!   payload packet protocol, in push or pull mode.
//!
//! [`ReaderSupervisor`] owns one of them, keeps it connected across unplugs
//! and hands parsed [`MrzRecord`](scanrelay_core::MrzRecord)s to a
//! [`RecordSink`](scanrelay_core::RecordSink).
//!
//! ```no_run
//! use scanrelay_hardware::{ReaderDrivers, ReaderSettings, ReaderSupervisor};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> scanrelay_hardware::Result<()> {
//! let (records, mut rx) = mpsc::channel(16);
//! let mut handle =
//!     ReaderSupervisor::from_settings(&ReaderSettings::default(), &ReaderDrivers::system(), records)?
//!         .start();
//!
//! while let Some(record) = rx.recv().await {
//!     println!("{}: {}", record.document_type, record.document_number);
//! }
//! handle.shutdown().await
//! # }
//! ```
//!
//! # Features
//!
//! - `hardware-serial` (default): real serial ports via `serialport`.
//! - `hardware-usb`: real HID readers via `hidapi`.
//!
//! Without a feature the matching transport never finds a device. The
//! [`mock`] module simulates both for tests.

pub mod config;
pub mod devices;
pub mod error;
pub mod hid;
#[cfg(feature = "hardware-usb")]
pub mod hidapi_sdk;
pub mod mock;
pub mod serial;
pub mod supervisor;
pub mod traits;
pub mod types;

pub use config::{BackendPreference, ReaderSettings, SerialMode};
pub use devices::{AnyReader, ReaderDrivers, select_backend};
pub use error::{HardwareError, Result};
pub use hid::{HidReader, HidSettings};
#[cfg(feature = "hardware-usb")]
pub use hidapi_sdk::HidApiSdk;
pub use serial::{PacketAssembler, SerialPacket, SerialReader, SerialSettings};
pub use supervisor::{ReaderSupervisor, SupervisorHandle, SupervisorState};
pub use traits::{ReaderBackend, SerialConnector, SerialLink, VendorSdk};
pub use types::{BackendKind, ReaderEvent, ReaderInfo};
