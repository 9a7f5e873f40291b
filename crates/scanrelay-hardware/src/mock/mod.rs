//! Simulated reader hardware for tests and development.
//!
//! Both mocks come as a device/handle pair: the device side plugs into a
//! backend, the handle side is kept by the test to script the hardware.

pub mod serial;
pub mod vendor_sdk;

pub use serial::{MOCK_SERIAL_NUMBER, MOCK_VERSION, MockSerialConnector, MockSerialHandle};
pub use vendor_sdk::{MockVendorSdk, MockVendorSdkHandle, SdkCall};
