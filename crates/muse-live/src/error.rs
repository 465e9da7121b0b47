//! Error types for the live session engine

use thiserror::Error;

/// Result type alias for live session operations
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur while running a live session
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to establish live connection: {0}")]
    ConnectionFailed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("audio capture failed: {0}")]
    CaptureFailed(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for LiveError {
    fn from(err: cpal::DevicesError) -> Self {
        LiveError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for LiveError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        LiveError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for LiveError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        LiveError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for LiveError {
    fn from(err: cpal::BuildStreamError) -> Self {
        LiveError::CaptureFailed(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for LiveError {
    fn from(err: cpal::PlayStreamError) -> Self {
        LiveError::CaptureFailed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::ConnectionFailed(err.to_string())
    }
}
