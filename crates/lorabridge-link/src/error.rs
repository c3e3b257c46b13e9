//! Error types for LoRaBridge link operations
//!
//! This module provides error handling for the serial link, the wire codec,
//! the queue store and the downstream collaborators (runtime control and
//! clock synchronization).

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for link operations
#[derive(Error, Debug)]
pub enum LinkError {
    // ===== Serial/Interface Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Serial read error
    #[error("Serial read error: {0}")]
    ReadError(String),

    /// Serial write error
    #[error("Serial write error: {0}")]
    WriteError(String),

    /// Serial port disconnected
    #[error("Serial port disconnected")]
    Disconnected,

    // ===== Codec Errors =====
    /// Frame had no type tag
    #[error("Empty frame")]
    EmptyFrame,

    /// Unknown frame type tag
    #[error("Unknown frame type tag: 0x{0:02X}")]
    UnknownFrameType(u8),

    // ===== Store Errors =====
    /// Queue store operation failed
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    // ===== Collaborator Errors =====
    /// Runtime control endpoint answered with a non-success status
    #[error("Runtime control rejected start: HTTP {status}")]
    RuntimeRejected {
        /// HTTP status code
        status: u16,
    },

    /// Runtime control endpoint could not be reached
    #[error("Runtime control request failed: {0}")]
    RuntimeUnreachable(String),

    /// System clock update failed
    #[error("Clock update failed: {0}")]
    ClockUpdateFailed(String),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            LinkError::Disconnected | LinkError::ReadError(_) | LinkError::WriteError(_) => true,
            LinkError::Store(e) => e.is_unavailable(),
            LinkError::RuntimeUnreachable(_) => true,
            _ => false,
        }
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            LinkError::PortNotFound(_) => "PORT_NOT_FOUND",
            LinkError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            LinkError::ReadError(_) => "READ_ERROR",
            LinkError::WriteError(_) => "WRITE_ERROR",
            LinkError::Disconnected => "DISCONNECTED",
            LinkError::EmptyFrame => "EMPTY_FRAME",
            LinkError::UnknownFrameType(_) => "UNKNOWN_FRAME_TYPE",
            LinkError::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            LinkError::Store(StoreError::Command(_)) => "STORE_COMMAND",
            LinkError::RuntimeRejected { .. } => "RUNTIME_REJECTED",
            LinkError::RuntimeUnreachable(_) => "RUNTIME_UNREACHABLE",
            LinkError::ClockUpdateFailed(_) => "CLOCK_UPDATE_FAILED",
            LinkError::InvalidConfig(_) => "INVALID_CONFIG",
            LinkError::ChannelClosed => "CHANNEL_CLOSED",
            LinkError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        LinkError::RuntimeUnreachable(err.to_string())
    }
}

#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for LinkError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind {
            tokio_serial::ErrorKind::NoDevice => LinkError::PortNotFound(err.description),
            tokio_serial::ErrorKind::Io(kind) => {
                LinkError::Io(std::io::Error::new(kind, err.description))
            }
            _ => LinkError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}
