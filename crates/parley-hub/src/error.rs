//! Error types for the hub and connection pumps.

use crate::client::ClientId;
use thiserror::Error;

/// Errors that can occur while relaying messages.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub control loop is no longer running.
    #[error("hub is closed")]
    HubClosed,

    /// A client's outbound queue could not take a message without waiting.
    #[error("client {0} is not keeping up")]
    SlowConsumer(ClientId),

    /// The outbound queue has been closed by the hub.
    #[error("outbound queue closed")]
    ChannelClosed,

    /// An inbound frame was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Decode(String),

    /// An inbound frame exceeded the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// Writing to the connection failed.
    #[error("failed to write to connection: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
