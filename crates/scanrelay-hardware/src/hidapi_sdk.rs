//! [`VendorSdk`] over the platform HID stack via `hidapi`.
//!
//! All `hidapi` objects live on one driver thread started by
//! [`VendorSdk::init`] and joined by [`VendorSdk::exit`]. The trait methods
//! post commands to it and wait for the answer. While a device is open the
//! thread polls it and hands each complete read to the data callback once
//! the input has been quiet for [`READ_GAP`]. Every wait on the thread is
//! bounded by the response timeout; a thread that stops answering is
//! abandoned rather than waited on.

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use scanrelay_core::constants::DEFAULT_HID_RESPONSE_TIMEOUT_MS;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::traits::{
    ConnectionCallback, DataCallback, HidDescriptor, OCR_MODULE, SdkHandle, VendorSdk,
};

/// Silence that ends one document read.
pub const READ_GAP: Duration = Duration::from_millis(100);

const POLL_MS: i32 = 20;
const IDLE_WAIT: Duration = Duration::from_millis(200);
const REPORT_SIZE: usize = 64;
const JOIN_POLL: Duration = Duration::from_millis(10);

enum Command {
    Enumerate {
        vendor_id: u16,
        product_id: u16,
        reply: Sender<Option<Vec<HidDescriptor>>>,
    },
    Open {
        vendor_id: u16,
        product_id: u16,
        reply: Sender<Option<SdkHandle>>,
    },
    Close(SdkHandle),
    RegisterData(SdkHandle, DataCallback, Sender<bool>),
    RegisterConnection(SdkHandle, ConnectionCallback, Sender<bool>),
    Unregister(SdkHandle, Sender<()>),
    Exit,
}

struct Driver {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// Vendor readers that present as plain HID devices.
pub struct HidApiSdk {
    driver: Mutex<Option<Driver>>,
    response_timeout: Duration,
}

impl Default for HidApiSdk {
    fn default() -> Self {
        Self::with_response_timeout(Duration::from_millis(DEFAULT_HID_RESPONSE_TIMEOUT_MS))
    }
}

impl std::fmt::Debug for HidApiSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidApiSdk")
            .field("running", &self.driver.lock().is_some())
            .finish()
    }
}

impl HidApiSdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_timeout(response_timeout: Duration) -> Self {
        Self {
            driver: Mutex::new(None),
            response_timeout,
        }
    }

    fn send(&self, command: Command) -> bool {
        match self.driver.lock().as_ref() {
            Some(driver) => driver.commands.send(command).is_ok(),
            None => false,
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = mpsc::channel();
        if !self.send(build(tx)) {
            return None;
        }
        match rx.recv_timeout(self.response_timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.response_timeout.as_millis() as u64,
                    "HID driver thread did not answer"
                );
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl VendorSdk for HidApiSdk {
    fn init(&self) -> bool {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return true;
        }

        let (commands, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("hid-driver".to_string())
            .spawn(move || match HidApi::new() {
                Ok(api) => {
                    let _ = ready_tx.send(true);
                    DriverThread::new(api, inbox).run();
                }
                Err(e) => {
                    error!(error = %e, "Failed to initialise hidapi");
                    let _ = ready_tx.send(false);
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                error!(error = %e, "Failed to start HID driver thread");
                return false;
            }
        };

        match ready_rx.recv_timeout(self.response_timeout) {
            Ok(true) => {
                *driver = Some(Driver { commands, thread });
                true
            }
            Ok(false) | Err(RecvTimeoutError::Disconnected) => {
                join_within(thread, self.response_timeout);
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("hidapi initialisation did not finish in time, abandoning driver thread");
                false
            }
        }
    }

    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Option<Vec<HidDescriptor>> {
        self.request(|reply| Command::Enumerate {
            vendor_id,
            product_id,
            reply,
        })
        .flatten()
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Option<SdkHandle> {
        self.request(|reply| Command::Open {
            vendor_id,
            product_id,
            reply,
        })
        .flatten()
    }

    fn close(&self, handle: SdkHandle) {
        self.send(Command::Close(handle));
    }

    fn register_data_callback(&self, handle: SdkHandle, callback: DataCallback) -> bool {
        self.request(|reply| Command::RegisterData(handle, callback, reply))
            .unwrap_or(false)
    }

    fn register_connection_callback(
        &self,
        handle: SdkHandle,
        callback: ConnectionCallback,
    ) -> bool {
        self.request(|reply| Command::RegisterConnection(handle, callback, reply))
            .unwrap_or(false)
    }

    fn unregister_callbacks(&self, handle: SdkHandle) {
        // Waits until the thread has dropped the callbacks.
        let _ = self.request(|reply| Command::Unregister(handle, reply));
    }

    fn exit(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        let _ = driver.commands.send(Command::Exit);
        join_within(driver.thread, self.response_timeout);
    }
}

/// Join `thread` unless it is still running after `limit`, in which case it
/// is left detached.
fn join_within(thread: JoinHandle<()>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            warn!("HID driver thread did not stop in time, detaching it");
            return;
        }
        std::thread::sleep(JOIN_POLL);
    }
    if thread.join().is_err() {
        warn!("HID driver thread panicked");
    }
}

struct OpenDevice {
    handle: SdkHandle,
    device: HidDevice,
    pending: Vec<u8>,
    last_read: Instant,
}

struct DriverThread {
    api: HidApi,
    inbox: Receiver<Command>,
    next_handle: u32,
    open: Option<OpenDevice>,
    data: Option<DataCallback>,
    connection: Option<ConnectionCallback>,
}

impl DriverThread {
    fn new(api: HidApi, inbox: Receiver<Command>) -> Self {
        Self {
            api,
            inbox,
            next_handle: 1,
            open: None,
            data: None,
            connection: None,
        }
    }

    fn run(mut self) {
        debug!("HID driver thread started");
        loop {
            let command = if self.open.is_some() {
                match self.inbox.try_recv() {
                    Ok(command) => Some(command),
                    Err(mpsc::TryRecvError::Empty) => None,
                    Err(mpsc::TryRecvError::Disconnected) => break,
                }
            } else {
                match self.inbox.recv_timeout(IDLE_WAIT) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            match command {
                Some(Command::Exit) => break,
                Some(command) => self.handle(command),
                None => self.poll(),
            }
        }
        debug!("HID driver thread stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enumerate {
                vendor_id,
                product_id,
                reply,
            } => {
                let _ = reply.send(self.enumerate(vendor_id, product_id));
            }
            Command::Open {
                vendor_id,
                product_id,
                reply,
            } => {
                let _ = reply.send(self.open(vendor_id, product_id));
            }
            Command::Close(handle) => {
                if self.open.as_ref().is_some_and(|d| d.handle == handle) {
                    self.open = None;
                    info!("HID device closed");
                }
            }
            Command::RegisterData(handle, callback, reply) => {
                let ok = self.is_open(handle);
                if ok {
                    self.data = Some(callback);
                }
                let _ = reply.send(ok);
            }
            Command::RegisterConnection(handle, callback, reply) => {
                let ok = self.is_open(handle);
                if ok {
                    self.connection = Some(callback);
                }
                let _ = reply.send(ok);
            }
            Command::Unregister(_, reply) => {
                self.data = None;
                self.connection = None;
                let _ = reply.send(());
            }
            Command::Exit => {}
        }
    }

    fn is_open(&self, handle: SdkHandle) -> bool {
        self.open.as_ref().is_some_and(|d| d.handle == handle)
    }

    fn enumerate(&mut self, vendor_id: u16, product_id: u16) -> Option<Vec<HidDescriptor>> {
        if let Err(e) = self.api.refresh_devices() {
            warn!(error = %e, "HID enumeration failed");
            return None;
        }
        let found: Vec<_> = self
            .api
            .device_list()
            .filter(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .map(|d| HidDescriptor {
                vendor_id,
                product_id,
                product: d.product_string().unwrap_or("HID reader").to_string(),
                serial_number: d.serial_number().map(str::to_string),
            })
            .collect();
        (!found.is_empty()).then_some(found)
    }

    fn open(&mut self, vendor_id: u16, product_id: u16) -> Option<SdkHandle> {
        match self.api.open(vendor_id, product_id) {
            Ok(device) => {
                let handle = SdkHandle(self.next_handle);
                self.next_handle += 1;
                self.open = Some(OpenDevice {
                    handle,
                    device,
                    pending: Vec::new(),
                    last_read: Instant::now(),
                });
                Some(handle)
            }
            Err(e) => {
                warn!(vendor_id, product_id, error = %e, "Failed to open HID device");
                None
            }
        }
    }

    fn poll(&mut self) {
        let Some(open) = self.open.as_mut() else {
            return;
        };

        let mut report = [0u8; REPORT_SIZE];
        match open.device.read_timeout(&mut report, POLL_MS) {
            Ok(0) => {
                if !open.pending.is_empty() && open.last_read.elapsed() >= READ_GAP {
                    let data = std::mem::take(&mut open.pending);
                    if let Some(callback) = &self.data {
                        callback(OCR_MODULE, &data);
                    }
                }
            }
            Ok(n) => {
                open.pending.extend_from_slice(&report[..n]);
                open.last_read = Instant::now();
            }
            Err(e) => {
                warn!(error = %e, "HID read failed, device lost");
                self.open = None;
                if let Some(callback) = &self.connection {
                    callback(false);
                }
            }
        }
    }
}
