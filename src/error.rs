//! Error types for Vienta

use thiserror::Error;

use crate::realtime::SessionState;

/// Result type alias for Vienta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a realtime session
#[derive(Debug, Error)]
pub enum Error {
    /// No usable credential (neither an override nor a server key)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The capture device refused access
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// Transport exchange failed at some negotiation step
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Send attempted with no open control channel
    #[error("control channel unavailable")]
    ChannelUnavailable,

    /// Wake word engine rejected its configuration or failed to start
    #[error("wake word configuration error: {0}")]
    DetectorConfig(String),

    /// Wake word engine could not be loaded
    #[error("wake word engine unavailable: {0}")]
    DetectorUnavailable(String),

    /// Negotiation was superseded by a stop request
    #[error("session start cancelled")]
    Cancelled,

    /// The orchestrator task is no longer running
    #[error("orchestrator is shut down")]
    Closed,

    /// Start requested while a session already exists
    #[error("session busy ({0})")]
    SessionBusy(SessionState),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from the wake word subsystem
    ///
    /// Detector failures never end a session.
    #[must_use]
    pub const fn is_detector_error(&self) -> bool {
        matches!(self, Self::DetectorConfig(_) | Self::DetectorUnavailable(_))
    }
}
