//! Error handling for the GattMsg CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Messenger error: {0}")]
    Messenger(#[from] gattmsg_core::MessengerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Peer {peer_id} not seen within {seconds}s")]
    PeerNotFound { peer_id: String, seconds: u64 },

    #[error("Session with {peer_id} ended: {reason}")]
    SessionEnded { peer_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
