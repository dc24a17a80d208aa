//! Error types for the messaging core

use thiserror::Error;
use uuid::Uuid;

use crate::peer::PeerId;
use crate::transport::RadioState;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by the role managers, either to the caller of a command
/// or to the observer when a transport operation fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessengerError {
    #[error("Radio unavailable: {state}")]
    RadioUnavailable { state: RadioState },

    #[error("Peer not discovered: {peer_id}")]
    PeerUnknown { peer_id: PeerId },

    #[error("Peer {peer_id} does not expose {expected}")]
    ProtocolMismatch { peer_id: PeerId, expected: String },

    #[error("Transport failure with {peer_id}: {reason}")]
    TransportFailure { peer_id: PeerId, reason: String },

    #[error("Write to unsupported characteristic {characteristic_id}")]
    RequestUnsupported { characteristic_id: Uuid },

    #[error("Not subscribed (current state: {state})")]
    NotSubscribed { state: &'static str },

    #[error("Message payload is empty")]
    EmptyPayload,

    #[error("Payload too large: {size} bytes (max: {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("Service is not registered")]
    ServiceNotRegistered,

    #[error("Role manager channel closed")]
    ChannelClosed,
}

/// Result type for messaging operations
pub type Result<T> = std::result::Result<T, MessengerError>;
