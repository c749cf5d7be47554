//! Timecode acquisition error types.

use tcsync_timecode::TimecodeError;
use thiserror::Error;

/// Errors raised by sources, recorder links and the manager.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The recorder could not be reached or the handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation did not finish within its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The recorder answered with something we could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration, e.g. drop-frame at 25 fps.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Neither the primary nor the fallback source could be started.
    #[error("No timecode source available (primary: {primary}; fallback: {fallback})")]
    NoSourceAvailable {
        /// Why the primary failed.
        primary: String,
        /// Why the fallback failed.
        fallback: String,
    },

    /// The manager has not been started.
    #[error("Timecode manager is not running")]
    NotRunning,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed timecode.
    #[error(transparent)]
    Timecode(#[from] TimecodeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Io(_) | Self::Protocol(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SyncError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SyncError::Connection("recorder link closed".into())
    }
}

/// Result type for timecode acquisition.
pub type Result<T> = std::result::Result<T, SyncError>;
