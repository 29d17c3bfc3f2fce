//! Error handling for the VigilEye plugin

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Conflict (camera id already registered)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Publisher used before connect
    #[error("Publisher not connected")]
    NotConnected,

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(#[from] lapin::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error (scorer service)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Scorer error
    #[error("Scorer error: {0}")]
    Scorer(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
