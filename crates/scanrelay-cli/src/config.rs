//! `scanrelay.toml` loading.
//!
//! ```toml
//! [reader]
//! backend = "serial"
//! serial_port = "/dev/ttyUSB0"
//!
//! [broker]
//! bind_addr = "0.0.0.0:5050"
//!
//! [agent]
//! server_addr = "10.0.0.5:5050"
//! device_name = "Front desk"
//! ```
//!
//! Every table and key is optional.

use anyhow::{Context, Result};
use scanrelay_hardware::ReaderSettings;
use scanrelay_network::{AgentSettings, BrokerSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub reader: ReaderSettings,
    pub broker: BrokerSettings,
    pub agent: AgentSettings,
}

impl AppConfig {
    /// Read `path`, or return the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanrelay_hardware::BackendPreference;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_missing_path_gives_defaults() {
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [reader]
            backend = "serial"
            serial_port = "COM3"

            [agent]
            device_name = "Front desk"
            heartbeat_interval = 30
            "#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.reader.backend, BackendPreference::Serial);
        assert_eq!(config.reader.serial_port, "COM3");
        assert_eq!(config.agent.device_name, "Front desk");
        assert_eq!(config.agent.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.broker, BrokerSettings::default());
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        assert!(AppConfig::parse("[reeder]\nbackend = \"hid\"").is_err());
    }

    #[test]
    fn test_unreadable_file_names_path() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/scanrelay.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scanrelay.toml"));
    }
}
