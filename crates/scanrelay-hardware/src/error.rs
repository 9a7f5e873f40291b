//! Error types for reader hardware.
//!
//! Backends never surface these from `connect`; a failed connect is just
//! `false`. They show up on explicit operations (trigger, info, config).

use scanrelay_mrz::TemplateError;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Reader is not connected or went away.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The backend cannot perform this operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Malformed bytes from the device.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Settings that cannot work, caught at startup.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}
