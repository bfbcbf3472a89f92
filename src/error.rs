//! Error types for ipcbus.

use thiserror::Error;

/// Main error type for all ipcbus operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (missing markers, non UTF-8 body, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed, or never established.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session slot was reused by a newer request before a response arrived.
    #[error("Session {0} was overwritten before a response arrived")]
    SessionOverwritten(u32),
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;
