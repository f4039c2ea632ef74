//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::message::MessageError),

    /// The connection was closed on request and accepts no more frames
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Too many frames buffered while the relay is not open
    #[error("Outbox full for relay: {0}")]
    OutboxFull(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Event publish failed
    #[error("Event publish failed: {0}")]
    PublishFailed(String),

    /// Invalid event
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
