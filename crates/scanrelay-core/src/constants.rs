//! Shared constants for the scanrelay system.
//!
//! Values here are used by more than one crate: MRZ text conventions, the
//! relay wire framing, and the default timings that the reader supervisor,
//! device agent and broker fall back to when no configuration overrides them.
//!
//! # Relay framing
//!
//! ```text
//! <STX>{"id":1,"request":{"type":"heartbeat"}}<ETX>
//! ```
//!
//! JSON escapes every control character, so STX/ETX never appear inside a
//! payload and a single byte scan is enough to find frame boundaries.

// ============================================================================
// MRZ Text
// ============================================================================

/// MRZ filler character, rendered as a blank after extraction.
pub const MRZ_FILLER: char = '<';

/// Separator between primary and secondary identifiers in the name zone.
pub const MRZ_NAME_SEPARATOR: &str = "<<";

/// Sex value used when the MRZ leaves the field unspecified.
pub const UNSPECIFIED_SEX: &str = "X";

/// Birth years above `current year % 100` belong to the previous century.
///
/// Expiration dates use this fixed pivot instead: `yy < 50` is 20yy.
pub const EXPIRY_CENTURY_PIVOT: u32 = 50;

// ============================================================================
// Relay Framing
// ============================================================================

/// Start of frame marker (STX).
pub const START_BYTE: u8 = 0x02;

/// End of frame marker (ETX).
pub const END_BYTE: u8 = 0x03;

/// Framing overhead: STX + ETX.
pub const FRAME_OVERHEAD: usize = 2;

/// Largest relay frame accepted on the wire (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

// ============================================================================
// Network Defaults
// ============================================================================

/// Default TCP port of the relay broker.
pub const DEFAULT_RELAY_PORT: u16 = 5050;

/// Default maximum number of simultaneous broker connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Default timeout for a single client request (milliseconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Interval between device agent reconnect attempts (seconds).
pub const DEFAULT_AGENT_RECONNECT_SECS: u64 = 5;

/// Interval between device agent heartbeats (seconds).
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Interval between registry sweeps (seconds).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Devices not seen for this long are removed by the sweep (seconds).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 15 * 60;

/// Name reported by a device agent when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "USB MRZ Reader";

// ============================================================================
// Reader Defaults
// ============================================================================

/// Liveness timer period of the reader supervisor (seconds).
pub const DEFAULT_READER_RECONNECT_SECS: u64 = 10;

/// `0` means the supervisor retries forever.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 0;

/// Access IS OCR reader vendor ID.
pub const DEFAULT_VENDOR_ID: u16 = 0x0DB5;

/// Access IS OCR reader product ID.
pub const DEFAULT_PRODUCT_ID: u16 = 0x013E;

/// Longest the HID driver may take to answer one call (milliseconds).
pub const DEFAULT_HID_RESPONSE_TIMEOUT_MS: u64 = 2000;

/// Desko reader vendor ID.
pub const DESKO_VENDOR_ID: u16 = 0x1C34;

/// Desko reader product ID.
pub const DESKO_PRODUCT_ID: u16 = 0x4E43;
