//! Reader backend and hardware collaborator traits.
//!
//! [`ReaderBackend`] is what the supervisor drives. It uses native `async fn`
//! (edition 2024), so it is not object-safe; the supervisor holds an
//! [`AnyReader`](crate::devices::AnyReader) instead of a trait object.
//!
//! [`VendorSdk`], [`SerialConnector`] and [`SerialLink`] are the narrow,
//! synchronous surfaces of the outside world the backends call into. They are
//! object-safe so that real drivers and test mocks can be swapped at runtime.

#![allow(async_fn_in_trait)]

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{BackendKind, ReaderEvent, ReaderInfo};

/// One hardware transport for a document reader.
///
/// # Examples
///
/// ```no_run
/// use scanrelay_hardware::traits::ReaderBackend;
/// use scanrelay_hardware::ReaderEvent;
/// use tokio::sync::mpsc;
///
/// async fn first_scan<R: ReaderBackend>(reader: &mut R) -> Option<String> {
///     let (tx, mut rx) = mpsc::channel(16);
///     if !reader.connect(tx).await {
///         return None;
///     }
///     while let Some(event) = rx.recv().await {
///         if let ReaderEvent::RawData(text) = event {
///             return Some(text);
///         }
///     }
///     None
/// }
/// ```
pub trait ReaderBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Open the device and start delivering events to `events`.
    ///
    /// Returns `false` on a missing device or port, a missing driver or any
    /// open failure. Never panics and never errors.
    async fn connect(&mut self, events: mpsc::Sender<ReaderEvent>) -> bool;

    /// Release the device. Idempotent and safe in any state.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Turn unsolicited scanning on or off.
    async fn set_scanning(&mut self, enable: bool) -> Result<()>;

    /// Ask the device for an active scan. Any result arrives as
    /// [`ReaderEvent::RawData`].
    async fn trigger_scan(&mut self) -> Result<()>;

    async fn info(&self) -> Result<ReaderInfo>;
}

/// Opaque handle issued by a [`VendorSdk`] for an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdkHandle(pub u32);

/// A device found by [`VendorSdk::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: String,
    pub serial_number: Option<String>,
}

/// Module number the vendor driver tags OCR/MRZ data with.
pub const OCR_MODULE: u8 = 1;

/// Data callback: `(module, bytes)`.
pub type DataCallback = Arc<dyn Fn(u8, &[u8]) + Send + Sync>;

/// Connection-status callback.
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Vendor HID driver surface.
///
/// Callbacks may be invoked from any driver thread. Implementations hold on
/// to the registered callbacks until [`unregister_callbacks`] and must not
/// call them afterwards.
///
/// [`unregister_callbacks`]: VendorSdk::unregister_callbacks
pub trait VendorSdk: Send + Sync {
    fn init(&self) -> bool;

    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Option<Vec<HidDescriptor>>;

    fn open(&self, vendor_id: u16, product_id: u16) -> Option<SdkHandle>;

    fn close(&self, handle: SdkHandle);

    fn register_data_callback(&self, handle: SdkHandle, callback: DataCallback) -> bool;

    fn register_connection_callback(&self, handle: SdkHandle, callback: ConnectionCallback)
    -> bool;

    fn unregister_callbacks(&self, handle: SdkHandle);

    fn exit(&self);
}

/// Byte-level access to an open serial port.
pub trait SerialLink: Send {
    fn bytes_available(&mut self) -> Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Discard anything pending in both directions.
    fn clear_buffers(&mut self) -> Result<()>;
}

/// Opens serial ports.
pub trait SerialConnector: Send + Sync {
    fn port_exists(&self, port: &str) -> bool;

    /// Open `port` at 8N1 and `baud_rate`.
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>>;
}
