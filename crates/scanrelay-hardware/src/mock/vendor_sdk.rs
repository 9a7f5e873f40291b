//! Simulated vendor HID driver.
//!
//! Every call into the driver is logged as an [`SdkCall`] so tests can check
//! ordering. Data and connection callbacks are fired from the caller's
//! thread, which in tests is usually a plain `std::thread` standing in for a
//! driver thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{
    ConnectionCallback, DataCallback, HidDescriptor, OCR_MODULE, SdkHandle, VendorSdk,
};

/// One call made into the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCall {
    Init,
    Enumerate,
    Open,
    RegisterData(SdkHandle),
    RegisterConnection(SdkHandle),
    UnregisterCallbacks(SdkHandle),
    Close(SdkHandle),
    Exit,
}

#[derive(Default)]
struct DriverState {
    device: Option<HidDescriptor>,
    init_fails: bool,
    register_fails: bool,
    open_stall: Option<Duration>,
    next_handle: u32,
    open_handle: Option<SdkHandle>,
    data: Option<DataCallback>,
    connection: Option<ConnectionCallback>,
    calls: Vec<SdkCall>,
}

#[derive(Clone)]
pub struct MockVendorSdk {
    state: Arc<Mutex<DriverState>>,
}

impl std::fmt::Debug for MockVendorSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVendorSdk").finish_non_exhaustive()
    }
}

impl MockVendorSdk {
    /// A driver with no device attached.
    pub fn new() -> (Self, MockVendorSdkHandle) {
        let state = Arc::new(Mutex::new(DriverState {
            next_handle: 1,
            ..DriverState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockVendorSdkHandle { state },
        )
    }
}

impl VendorSdk for MockVendorSdk {
    fn init(&self) -> bool {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::Init);
        !state.init_fails
    }

    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Option<Vec<HidDescriptor>> {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::Enumerate);
        let found: Vec<_> = state
            .device
            .iter()
            .filter(|d| d.vendor_id == vendor_id && d.product_id == product_id)
            .cloned()
            .collect();
        (!found.is_empty()).then_some(found)
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Option<SdkHandle> {
        let stall = {
            let mut state = self.state.lock();
            state.calls.push(SdkCall::Open);
            state.open_stall
        };
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }

        let mut state = self.state.lock();
        let present = state
            .device
            .as_ref()
            .is_some_and(|d| d.vendor_id == vendor_id && d.product_id == product_id);
        if !present {
            return None;
        }
        let handle = SdkHandle(state.next_handle);
        state.next_handle += 1;
        state.open_handle = Some(handle);
        Some(handle)
    }

    fn close(&self, handle: SdkHandle) {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::Close(handle));
        if state.open_handle == Some(handle) {
            state.open_handle = None;
        }
    }

    fn register_data_callback(&self, handle: SdkHandle, callback: DataCallback) -> bool {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::RegisterData(handle));
        if state.register_fails || state.open_handle != Some(handle) {
            return false;
        }
        state.data = Some(callback);
        true
    }

    fn register_connection_callback(
        &self,
        handle: SdkHandle,
        callback: ConnectionCallback,
    ) -> bool {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::RegisterConnection(handle));
        if state.register_fails || state.open_handle != Some(handle) {
            return false;
        }
        state.connection = Some(callback);
        true
    }

    fn unregister_callbacks(&self, handle: SdkHandle) {
        let mut state = self.state.lock();
        state.calls.push(SdkCall::UnregisterCallbacks(handle));
        state.data = None;
        state.connection = None;
    }

    fn exit(&self) {
        self.state.lock().calls.push(SdkCall::Exit);
    }
}

/// Controls a [`MockVendorSdk`].
#[derive(Clone)]
pub struct MockVendorSdkHandle {
    state: Arc<Mutex<DriverState>>,
}

impl std::fmt::Debug for MockVendorSdkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVendorSdkHandle").finish_non_exhaustive()
    }
}

impl MockVendorSdkHandle {
    /// Plug in a reader with the default identifiers (0x0DB5:0x013E).
    pub fn attach_device(&self, product: &str) {
        self.attach(HidDescriptor {
            vendor_id: 0x0DB5,
            product_id: 0x013E,
            product: product.to_string(),
            serial_number: Some("HID-0001".to_string()),
        });
    }

    pub fn attach(&self, descriptor: HidDescriptor) {
        self.state.lock().device = Some(descriptor);
    }

    /// Unplug the reader, notifying any registered connection callback.
    pub fn detach_device(&self) {
        let callback = {
            let mut state = self.state.lock();
            state.device = None;
            state.connection.clone()
        };
        if let Some(callback) = callback {
            callback(false);
        }
    }

    pub fn set_init_ok(&self, ok: bool) {
        self.state.lock().init_fails = !ok;
    }

    pub fn set_register_ok(&self, ok: bool) {
        self.state.lock().register_fails = !ok;
    }

    /// Make `open` block for `stall`, like a driver stuck in the USB stack.
    pub fn stall_open(&self, stall: Duration) {
        self.state.lock().open_stall = Some(stall);
    }

    /// Fire the data callback. Does nothing when none is registered.
    pub fn emit_data(&self, module: u8, bytes: &[u8]) {
        let callback = self.state.lock().data.clone();
        if let Some(callback) = callback {
            callback(module, bytes);
        }
    }

    /// Deliver `text` as an OCR read.
    pub fn scan(&self, text: &str) {
        self.emit_data(OCR_MODULE, text.as_bytes());
    }

    pub fn fire_connection(&self, connected: bool) {
        let callback = self.state.lock().connection.clone();
        if let Some(callback) = callback {
            callback(connected);
        }
    }

    pub fn callbacks_registered(&self) -> bool {
        let state = self.state.lock();
        state.data.is_some() || state.connection.is_some()
    }

    pub fn calls(&self) -> Vec<SdkCall> {
        self.state.lock().calls.clone()
    }
}
