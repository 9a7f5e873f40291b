//! Serde adapter for durations written as integer seconds.
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Settings {
//!     #[serde(with = "scanrelay_core::duration_secs")]
//!     interval: Duration,
//! }
//!
//! let settings: Settings = serde_json::from_str(r#"{"interval": 30}"#).unwrap();
//! assert_eq!(settings.interval, Duration::from_secs(30));
//! ```

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}
