use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Durable device identifier.
///
/// Assigned once by the broker when a device first registers on a connection
/// and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        DeviceId(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(DeviceId)
            .map_err(|_| Error::InvalidDeviceId(s.to_string()))
    }
}

/// Identifier of a requesting terminal.
///
/// Terminals name themselves; the only requirement is a non-blank value,
/// since reservations are compared by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TerminalId(String);

impl TerminalId {
    /// Create a terminal identifier.
    ///
    /// # Errors
    /// Returns `Error::InvalidTerminalId` if the value is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidTerminalId("terminal ID must not be blank".to_string()));
        }
        Ok(TerminalId(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TerminalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TerminalId::new(s)
    }
}

impl TryFrom<String> for TerminalId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        TerminalId::new(value)
    }
}

impl From<TerminalId> for String {
    fn from(id: TerminalId) -> Self {
        id.0
    }
}

/// Per-connection identifier assigned by the relay server.
///
/// Stable for the lifetime of one TCP connection and used to clean up the
/// registry when that connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
