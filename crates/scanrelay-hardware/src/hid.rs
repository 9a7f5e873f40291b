//! USB-HID document reader driven through a vendor SDK.
//!
//! The SDK calls back from its own threads. The callbacks registered here do
//! nothing but post a [`ReaderEvent`] with `try_send`, so no processing ever
//! runs on a driver thread. The reader keeps its own clones of the callbacks
//! for as long as they are registered, and teardown always runs
//! unregister, close, exit in that order.
//!
//! SDK calls block, so they run on the blocking pool and are bounded by
//! [`HidSettings::response_timeout`]. An open that finishes after its
//! deadline is torn down as soon as the driver answers.

use scanrelay_core::constants::DEFAULT_HID_RESPONSE_TIMEOUT_MS;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReaderSettings;
use crate::error::{HardwareError, Result};
use crate::traits::{
    ConnectionCallback, DataCallback, HidDescriptor, OCR_MODULE, ReaderBackend, SdkHandle,
    VendorSdk,
};
use crate::types::{BackendKind, ReaderEvent, ReaderInfo};

/// USB identifiers of the reader to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Budget for the whole open sequence, and for teardown.
    pub response_timeout: Duration,
}

impl From<&ReaderSettings> for HidSettings {
    fn from(settings: &ReaderSettings) -> Self {
        Self {
            vendor_id: settings.vendor_id,
            product_id: settings.product_id,
            response_timeout: Duration::from_millis(DEFAULT_HID_RESPONSE_TIMEOUT_MS),
        }
    }
}

struct Registration {
    handle: SdkHandle,
    // Held so the callbacks outlive their registration.
    _data: DataCallback,
    _connection: ConnectionCallback,
}

struct Opened {
    descriptor: HidDescriptor,
    registration: Registration,
}

pub struct HidReader {
    sdk: Arc<dyn VendorSdk>,
    settings: HidSettings,
    registration: Option<Registration>,
    connected: Arc<AtomicBool>,
    descriptor: Option<HidDescriptor>,
}

impl std::fmt::Debug for HidReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidReader")
            .field("vendor_id", &format_args!("{:#06x}", self.settings.vendor_id))
            .field("product_id", &format_args!("{:#06x}", self.settings.product_id))
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl HidReader {
    pub fn new(sdk: Arc<dyn VendorSdk>, settings: HidSettings) -> Self {
        Self {
            sdk,
            settings,
            registration: None,
            connected: Arc::new(AtomicBool::new(false)),
            descriptor: None,
        }
    }

    /// The device found at the last successful connect.
    pub fn descriptor(&self) -> Option<&HidDescriptor> {
        self.descriptor.as_ref()
    }

    fn data_callback(&self, events: mpsc::Sender<ReaderEvent>) -> DataCallback {
        Arc::new(move |module, bytes| {
            if module != OCR_MODULE {
                return;
            }
            let text = decode_ocr(bytes);
            if text.is_empty() {
                return;
            }
            if events.try_send(ReaderEvent::RawData(text)).is_err() {
                warn!("Event queue full, HID scan dropped");
            }
        })
    }

    fn connection_callback(&self, events: mpsc::Sender<ReaderEvent>) -> ConnectionCallback {
        let connected = Arc::clone(&self.connected);
        Arc::new(move |is_connected| {
            connected.store(is_connected, Ordering::SeqCst);
            let _ = events.try_send(ReaderEvent::ConnectionChanged(is_connected));
        })
    }

    async fn release(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        let Some(registration) = self.registration.take() else {
            return;
        };

        let sdk = Arc::clone(&self.sdk);
        let task = tokio::task::spawn_blocking(move || teardown(sdk.as_ref(), registration));
        match tokio::time::timeout(self.settings.response_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "HID teardown task failed"),
            Err(_) => warn!(
                timeout_ms = self.settings.response_timeout.as_millis() as u64,
                "HID driver did not finish teardown in time"
            ),
        }
    }

    /// Tear down an open that is still running past its deadline.
    fn abandon(&self, task: JoinHandle<Option<Opened>>) {
        let sdk = Arc::clone(&self.sdk);
        tokio::spawn(async move {
            if let Ok(Some(opened)) = task.await {
                debug!("Late HID open completed, closing it");
                let _ = tokio::task::spawn_blocking(move || {
                    teardown(sdk.as_ref(), opened.registration)
                })
                .await;
            }
        });
    }
}

/// OCR data arrives as ASCII, sometimes NUL padded to the report size.
fn decode_ocr(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Blocking half of [`HidReader::connect`]. On failure the driver is left
/// fully torn down.
fn open_device(
    sdk: &dyn VendorSdk,
    settings: HidSettings,
    data: DataCallback,
    connection: ConnectionCallback,
) -> Option<Opened> {
    let HidSettings {
        vendor_id,
        product_id,
        ..
    } = settings;

    if !sdk.init() {
        warn!("HID driver initialisation failed");
        return None;
    }

    let Some(descriptor) = sdk
        .enumerate(vendor_id, product_id)
        .and_then(|devices| devices.into_iter().next())
    else {
        debug!(vendor_id, product_id, "No HID reader enumerated");
        sdk.exit();
        return None;
    };

    let Some(handle) = sdk.open(vendor_id, product_id) else {
        warn!(vendor_id, product_id, "Failed to open HID reader");
        sdk.exit();
        return None;
    };

    let registration = Registration {
        handle,
        _data: Arc::clone(&data),
        _connection: Arc::clone(&connection),
    };
    if !sdk.register_data_callback(handle, data)
        || !sdk.register_connection_callback(handle, connection)
    {
        warn!("Failed to register HID callbacks");
        teardown(sdk, registration);
        return None;
    }

    Some(Opened {
        descriptor,
        registration,
    })
}

fn teardown(sdk: &dyn VendorSdk, registration: Registration) {
    sdk.unregister_callbacks(registration.handle);
    sdk.close(registration.handle);
    sdk.exit();
}

impl ReaderBackend for HidReader {
    fn kind(&self) -> BackendKind {
        BackendKind::Hid
    }

    async fn connect(&mut self, events: mpsc::Sender<ReaderEvent>) -> bool {
        if self.is_connected() {
            return true;
        }
        self.release().await;

        let data = self.data_callback(events.clone());
        let connection = self.connection_callback(events);
        let sdk = Arc::clone(&self.sdk);
        let settings = self.settings;
        let mut task =
            tokio::task::spawn_blocking(move || open_device(sdk.as_ref(), settings, data, connection));

        let opened = match tokio::time::timeout(settings.response_timeout, &mut task).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                error!(error = %e, "HID open task failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = settings.response_timeout.as_millis() as u64,
                    "HID driver did not answer in time"
                );
                self.abandon(task);
                None
            }
        };

        let Some(Opened {
            descriptor,
            registration,
        }) = opened
        else {
            self.connected.store(false, Ordering::SeqCst);
            return false;
        };

        info!(
            product = %descriptor.product,
            serial_number = ?descriptor.serial_number,
            "HID reader connected"
        );
        self.registration = Some(registration);
        self.descriptor = Some(descriptor);
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&mut self) {
        let was_open = self.registration.is_some();
        self.release().await;
        if was_open {
            info!("HID reader disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_scanning(&mut self, _enable: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(HardwareError::disconnected("HID reader"));
        }
        // The vendor firmware always scans when a document is inserted.
        Ok(())
    }

    async fn trigger_scan(&mut self) -> Result<()> {
        Err(HardwareError::unsupported("trigger_scan on HID reader"))
    }

    async fn info(&self) -> Result<ReaderInfo> {
        let descriptor = self
            .descriptor
            .as_ref()
            .filter(|_| self.is_connected())
            .ok_or_else(|| HardwareError::disconnected("HID reader"))?;

        let mut info = ReaderInfo::new(descriptor.product.clone(), BackendKind::Hid);
        if let Some(serial) = &descriptor.serial_number {
            info = info.with_serial_number(serial.clone());
        }
        Ok(info)
    }
}
