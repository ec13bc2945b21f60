use thiserror::Error;

use crate::config::ConfigError;

/// Categorizes errors for consumer decision-making.
///
/// This is a lightweight, cloneable representation of the error type
/// that can be matched on without destructuring the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration, raised synchronously at construction
    Config,
    /// WebSocket protocol or transport error
    WebSocket,
    /// Malformed payload received from the gateway
    Protocol,
    /// Malformed compressed stream
    Compression,
    /// Gateway metadata could not be fetched
    MetadataFetch,
    /// Connect called on a shard that is not disconnected
    AlreadyConnected,
    /// Internal channel send error
    Channel,
}

/// Errors that can occur in shardgate
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed payload received from the gateway
    #[error("malformed gateway payload: {0}")]
    Protocol(String),

    /// The continuously-compressed stream could not be inflated
    #[error("compressed stream error: {0}")]
    Compression(String),

    /// Gateway metadata fetch failed; bring-up must not proceed
    #[error("gateway metadata fetch failed: {0}")]
    MetadataFetch(String),

    /// Connect was called on a shard that is not disconnected
    #[error("shard {0} is already connected")]
    AlreadyConnected(u16),

    /// Internal channel send error
    #[error("channel send error: {0}")]
    ChannelSend(String),
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Compression(_) => ErrorKind::Compression,
            Error::MetadataFetch(_) => ErrorKind::MetadataFetch,
            Error::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Error::ChannelSend(_) => ErrorKind::Channel,
        }
    }
}
