use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Wire errors
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    // Identifier errors
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid terminal ID: {0}")]
    InvalidTerminalId(String),

    // Template errors
    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
