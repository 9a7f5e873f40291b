//! Broker and agent settings. Durations are whole seconds in TOML.

use scanrelay_core::constants::{
    DEFAULT_AGENT_RECONNECT_SECS, DEFAULT_DEVICE_NAME, DEFAULT_HEARTBEAT_SECS,
    DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_RELAY_PORT,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use scanrelay_core::{Error, Result, duration_secs};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Relay server settings.
///
/// # Example
///
/// ```
/// use scanrelay_network::BrokerSettings;
///
/// let settings = BrokerSettings {
///     bind_addr: "127.0.0.1:0".parse().unwrap(),
///     ..BrokerSettings::default()
/// };
/// assert_eq!(settings.max_connections, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub bind_addr: SocketAddr,

    /// Connections beyond this are closed on accept.
    pub max_connections: usize,

    /// How often the registry is swept.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,

    /// Devices silent for longer than this are removed by the sweep.
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_RELAY_PORT),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
        }
    }
}

impl BrokerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep_interval must be at least one second".into()));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(Error::Config(
                "inactivity_timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

/// Device agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub server_addr: SocketAddr,

    /// Name announced on registration.
    pub device_name: String,

    /// Connect and reply timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,

    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_RELAY_PORT),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect_interval: Duration::from_secs(DEFAULT_AGENT_RECONNECT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(Error::Config("device_name must not be empty".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request_timeout must be at least one second".into()));
        }
        if self.reconnect_interval.is_zero() || self.heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "reconnect_interval and heartbeat_interval must be at least one second".into(),
            ));
        }
        Ok(())
    }
}
