//! Error types for the scanning core

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by frame analysis, page encoding and configuration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame buffer does not match its declared dimensions
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Page encoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Session identifier is empty or contains characters that cannot cross a link
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
