//! Transport adapter boundary
//!
//! Role managers never call the radio directly. They dispatch commands through
//! a [`CommandSink`] and later receive the outcome as an event. Commands are
//! fire-and-forget; the adapter raises events from its own task, outside the
//! manager's call stack.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::descriptor::{CharacteristicHandle, ServiceDescriptor};
use crate::peer::PeerId;

// ----------------------------------------------------------------------------
// Radio State
// ----------------------------------------------------------------------------

/// Power state reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(self) -> bool {
        self == RadioState::PoweredOn
    }

    pub fn name(self) -> &'static str {
        match self {
            RadioState::Unknown => "unknown",
            RadioState::Resetting => "resetting",
            RadioState::Unsupported => "unsupported",
            RadioState::Unauthorized => "unauthorized",
            RadioState::PoweredOff => "powered off",
            RadioState::PoweredOn => "powered on",
        }
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome string reported by the radio for an operation
pub type TransportResult<T> = std::result::Result<T, String>;

// ----------------------------------------------------------------------------
// Central Role
// ----------------------------------------------------------------------------

/// Requests from the central role manager to the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCommand {
    /// Start scanning. An empty service list means no filter.
    StartScan { services: Vec<Uuid> },
    StopScan,
    Connect { peer_id: PeerId },
    Disconnect { peer_id: PeerId },
    DiscoverServices { peer_id: PeerId, service_id: Uuid },
    DiscoverCharacteristics {
        peer_id: PeerId,
        service_id: Uuid,
        characteristic_id: Uuid,
    },
    /// Enable notifications on the characteristic
    Subscribe {
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
    },
    /// Write with response
    Write {
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
        payload: Vec<u8>,
    },
}

/// Radio events delivered to the central role manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    PowerStateChanged(RadioState),
    ScanFailed {
        reason: String,
    },
    PeerDiscovered {
        peer_id: PeerId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Connected {
        peer_id: PeerId,
    },
    ConnectFailed {
        peer_id: PeerId,
        reason: String,
    },
    Disconnected {
        peer_id: PeerId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        peer_id: PeerId,
        result: TransportResult<Vec<Uuid>>,
    },
    CharacteristicsDiscovered {
        peer_id: PeerId,
        service_id: Uuid,
        result: TransportResult<Vec<CharacteristicHandle>>,
    },
    SubscriptionChanged {
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
        result: TransportResult<()>,
    },
    ValueUpdated {
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
    },
    WriteAcknowledged {
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
        result: TransportResult<()>,
    },
}

impl CentralEvent {
    /// Peer whose link this event belongs to. Power, scan and discovery
    /// events are not tied to a link.
    pub fn link_peer(&self) -> Option<&PeerId> {
        match self {
            CentralEvent::PowerStateChanged(_)
            | CentralEvent::ScanFailed { .. }
            | CentralEvent::PeerDiscovered { .. } => None,
            CentralEvent::Connected { peer_id }
            | CentralEvent::ConnectFailed { peer_id, .. }
            | CentralEvent::Disconnected { peer_id, .. }
            | CentralEvent::ServicesDiscovered { peer_id, .. }
            | CentralEvent::CharacteristicsDiscovered { peer_id, .. }
            | CentralEvent::SubscriptionChanged { peer_id, .. }
            | CentralEvent::ValueUpdated { peer_id, .. }
            | CentralEvent::WriteAcknowledged { peer_id, .. } => Some(peer_id),
        }
    }

    /// Whether this is the last event the transport raises for a link
    pub fn ends_link(&self) -> bool {
        matches!(
            self,
            CentralEvent::ConnectFailed { .. } | CentralEvent::Disconnected { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CentralEvent::PowerStateChanged(_) => "PowerStateChanged",
            CentralEvent::ScanFailed { .. } => "ScanFailed",
            CentralEvent::PeerDiscovered { .. } => "PeerDiscovered",
            CentralEvent::Connected { .. } => "Connected",
            CentralEvent::ConnectFailed { .. } => "ConnectFailed",
            CentralEvent::Disconnected { .. } => "Disconnected",
            CentralEvent::ServicesDiscovered { .. } => "ServicesDiscovered",
            CentralEvent::CharacteristicsDiscovered { .. } => "CharacteristicsDiscovered",
            CentralEvent::SubscriptionChanged { .. } => "SubscriptionChanged",
            CentralEvent::ValueUpdated { .. } => "ValueUpdated",
            CentralEvent::WriteAcknowledged { .. } => "WriteAcknowledged",
        }
    }
}

// ----------------------------------------------------------------------------
// Peripheral Role
// ----------------------------------------------------------------------------

/// Identifier the radio stack assigns to a pending write request
pub type RequestId = u64;

/// Identifier of a notification subscriber, as known to the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ATT result sent back for a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttResponse {
    Success,
    RequestNotSupported,
}

/// A write from a remote central, as received by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub request_id: RequestId,
    pub peer_id: PeerId,
    pub characteristic_id: Uuid,
    pub value: Option<Vec<u8>>,
}

/// Requests from the peripheral role manager to the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCommand {
    RegisterService(ServiceDescriptor),
    StartAdvertising {
        service_id: Uuid,
        local_name: String,
    },
    StopAdvertising,
    RespondToWrite {
        request_id: RequestId,
        response: AttResponse,
    },
    /// Push a value to every subscribed central
    NotifySubscribers {
        characteristic_id: Uuid,
        value: Vec<u8>,
    },
}

/// Radio events delivered to the peripheral role manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    PowerStateChanged(RadioState),
    ServiceAdded {
        service_id: Uuid,
        result: TransportResult<()>,
    },
    AdvertisingStarted {
        result: TransportResult<()>,
    },
    WriteRequestsReceived(Vec<WriteRequest>),
    SubscriberAdded {
        subscriber: SubscriberId,
    },
    SubscriberRemoved {
        subscriber: SubscriberId,
    },
}

// ----------------------------------------------------------------------------
// Command Sink
// ----------------------------------------------------------------------------

/// Where a role manager sends its transport commands
pub trait CommandSink<C>: Send {
    /// Hand a command to the transport. Never blocks; the outcome arrives as an event.
    fn dispatch(&mut self, command: C);
}

impl<C: Send + fmt::Debug> CommandSink<C> for mpsc::UnboundedSender<C> {
    fn dispatch(&mut self, command: C) {
        if let Err(e) = self.send(command) {
            tracing::warn!("Transport command dropped, adapter gone: {:?}", e.0);
        }
    }
}

impl<C: Send> CommandSink<C> for Vec<C> {
    fn dispatch(&mut self, command: C) {
        self.push(command);
    }
}
