use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`RelayClient`](crate::RelayClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to server")]
    NotConnected,

    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    #[error("No reply within {0}ms")]
    ReadTimeout(u64),

    #[error("Write timeout after {0}ms")]
    WriteTimeout(u64),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] scanrelay_core::Error),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unexpected reply to {request}: {reply}")]
    UnexpectedReply {
        request: &'static str,
        reply: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost(reason.into())
    }

    /// Whether the connection is gone and must be re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionLost(_) | Self::Io(_) | Self::WriteTimeout(_)
        )
    }
}
