//! Error types for scan signaling and peer negotiation

/// Result type alias using the transport Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or orchestrating a scan
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling relay unreachable or refused the join
    #[error("Connect error: {0}")]
    Connect(String),

    /// Session already has both participants
    #[error("Session full: {0}")]
    SessionFull(String),

    /// Channel was left; nothing more can be sent on it
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// Relay reported a protocol error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Action not allowed in the current step
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Camera could not be opened
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(#[from] docscan_core::CameraError),

    /// External collaborator failed
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] docscan_core::CollaboratorError),

    /// Frame, encoding or session-id error from the core
    #[error(transparent)]
    Core(#[from] docscan_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable by restarting the session
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect(_)
                | Error::SignalingError(_)
                | Error::OperationTimeout(_)
                | Error::WebSocketError(_)
                | Error::CameraUnavailable(_)
                | Error::Collaborator(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error came out of offer/answer/ICE handling
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::PeerConnectionError(_)
                | Error::WebRtcError(_)
        )
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocketError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
