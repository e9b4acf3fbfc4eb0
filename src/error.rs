//! Error types for roomchat.

use thiserror::Error;

use crate::chat::RegistryError;
use crate::protocol::HandshakeError;

/// Common error type for roomchat.
#[derive(Error, Debug)]
pub enum RoomchatError {
    /// I/O error on a socket or file.
    ///
    /// Mid-session socket failures end up here and are recovered locally by
    /// the affected connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The three-field handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Room registry rejected a create/join or a post.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// History could not be written to disk.
    #[error("history persistence failed: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for configuration or user input.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for roomchat operations.
pub type Result<T> = std::result::Result<T, RoomchatError>;
