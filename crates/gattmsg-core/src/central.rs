//! Central role manager
//!
//! Drives scan → connect → service discovery → characteristic discovery →
//! subscribe → exchange. Every radio event goes through [`CentralManager::handle_event`],
//! which matches on `(state, event)` and drops combinations that do not make
//! sense for the current state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CentralConfig;
use crate::descriptor::{CharacteristicHandle, ServiceDescriptor};
use crate::error::{MessengerError, Result};
use crate::message::Message;
use crate::observer::{emit, ObserverEvent, ObserverSender};
use crate::peer::{DiscoveryTable, PeerId, PeerRecord};
use crate::transport::{
    CentralCommand, CentralEvent, CommandSink, RadioState, TransportResult,
};

// ----------------------------------------------------------------------------
// States
// ----------------------------------------------------------------------------

/// Externally visible state of the central role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralState {
    PoweredOff,
    Idle,
    Scanning,
    Connecting,
    /// Link up, peer not yet verified (or verified as not running our service)
    Connected,
    ServiceDiscovering,
    CharacteristicDiscovering,
    Subscribed,
    /// Teardown requested, waiting for the transport to confirm
    Disconnected,
}

impl CentralState {
    pub fn name(self) -> &'static str {
        match self {
            CentralState::PoweredOff => "PoweredOff",
            CentralState::Idle => "Idle",
            CentralState::Scanning => "Scanning",
            CentralState::Connecting => "Connecting",
            CentralState::Connected => "Connected",
            CentralState::ServiceDiscovering => "ServiceDiscovering",
            CentralState::CharacteristicDiscovering => "CharacteristicDiscovering",
            CentralState::Subscribed => "Subscribed",
            CentralState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for CentralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a single link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    ServiceDiscovering,
    CharacteristicDiscovering,
    Subscribed,
    /// Connected, but the peer does not expose the messenger characteristic
    Unusable,
    Disconnecting,
}

/// A link to one peer, from connect request until disconnect
#[derive(Debug, Clone)]
pub struct Connection {
    pub peer: Arc<PeerRecord>,
    pub state: ConnectionState,
    pub characteristic: Option<CharacteristicHandle>,
}

impl Connection {
    fn new(peer: Arc<PeerRecord>) -> Self {
        Self {
            peer,
            state: ConnectionState::Connecting,
            characteristic: None,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer.peer_id
    }
}

// ----------------------------------------------------------------------------
// Central Manager
// ----------------------------------------------------------------------------

/// Client side of the messenger
pub struct CentralManager<S> {
    config: CentralConfig,
    descriptor: ServiceDescriptor,
    radio: RadioState,
    scanning: bool,
    discovered: DiscoveryTable,
    connection: Option<Connection>,
    /// Links dropped before the transport confirmed their teardown, per peer
    pending_teardown: HashMap<PeerId, usize>,
    transport: S,
    observer: ObserverSender,
}

impl<S: CommandSink<CentralCommand>> CentralManager<S> {
    pub fn new(
        config: CentralConfig,
        descriptor: ServiceDescriptor,
        transport: S,
        observer: ObserverSender,
    ) -> Self {
        Self {
            config,
            descriptor,
            radio: RadioState::Unknown,
            scanning: false,
            discovered: DiscoveryTable::new(),
            connection: None,
            pending_teardown: HashMap::new(),
            transport,
            observer,
        }
    }

    pub fn state(&self) -> CentralState {
        if !self.radio.is_powered_on() {
            return CentralState::PoweredOff;
        }
        match self.connection.as_ref().map(|c| c.state) {
            Some(ConnectionState::Connecting) => CentralState::Connecting,
            Some(ConnectionState::Connected) | Some(ConnectionState::Unusable) => {
                CentralState::Connected
            }
            Some(ConnectionState::ServiceDiscovering) => CentralState::ServiceDiscovering,
            Some(ConnectionState::CharacteristicDiscovering) => {
                CentralState::CharacteristicDiscovering
            }
            Some(ConnectionState::Subscribed) => CentralState::Subscribed,
            Some(ConnectionState::Disconnecting) => CentralState::Disconnected,
            None if self.scanning => CentralState::Scanning,
            None => CentralState::Idle,
        }
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio
    }

    pub fn discovered(&self) -> &DiscoveryTable {
        &self.discovered
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    /// Forget every discovered peer except the one currently connected
    pub fn clear_discovered(&mut self) {
        let keep = self.connection.as_ref().map(|c| c.peer.clone());
        self.discovered.clear();
        if let Some(peer) = keep {
            self.discovered
                .observe(peer.peer_id.clone(), peer.display_name.clone(), peer.last_seen_rssi);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Start a scan. A no-op unless the radio is on and the manager is idle.
    pub fn start_scan(&mut self) {
        if !self.radio.is_powered_on() {
            warn!("Cannot start scan, radio is {}", self.radio);
            return;
        }
        match self.state() {
            CentralState::Idle => {}
            CentralState::Scanning => {
                debug!("Scan already running");
                return;
            }
            state => {
                warn!("Not scanning while {}", state);
                return;
            }
        }

        let services = if self.config.filter_by_service {
            vec![self.descriptor.service_id]
        } else {
            Vec::new()
        };
        self.transport.dispatch(CentralCommand::StartScan { services });
        self.scanning = true;
        info!("Scanning for peripherals");
    }

    pub fn stop_scan(&mut self) {
        if !self.scanning {
            debug!("No scan to stop");
            return;
        }
        self.transport.dispatch(CentralCommand::StopScan);
        self.scanning = false;
        info!("Stopped scanning");
    }

    /// Connect to a discovered peer. Scanning is stopped first.
    pub fn connect(&mut self, peer_id: &PeerId) -> Result<()> {
        let record = self
            .discovered
            .get(peer_id)
            .ok_or_else(|| MessengerError::PeerUnknown {
                peer_id: peer_id.clone(),
            })?;
        if !self.radio.is_powered_on() {
            return Err(MessengerError::RadioUnavailable { state: self.radio });
        }

        if let Some(current) = self.connection.as_ref() {
            if current.peer_id() == peer_id && current.state != ConnectionState::Disconnecting {
                debug!("Already connected or connecting to {}", peer_id);
                return Ok(());
            }
            self.replace_connection();
        }

        self.stop_scan();
        self.transport.dispatch(CentralCommand::Connect {
            peer_id: peer_id.clone(),
        });
        info!("Connecting to {} ({})", peer_id, record.name_or_unknown());
        self.connection = Some(Connection::new(record));
        Ok(())
    }

    /// Cancel a connect attempt or close the link. Completion is reported
    /// once the transport confirms.
    pub fn disconnect(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            debug!("Nothing to disconnect");
            return;
        };
        if connection.state == ConnectionState::Disconnecting {
            return;
        }
        self.transport.dispatch(CentralCommand::Disconnect {
            peer_id: connection.peer.peer_id.clone(),
        });
        connection.state = ConnectionState::Disconnecting;
        info!("Disconnecting from {}", connection.peer.peer_id);
    }

    /// Write a message to the subscribed peer
    pub fn send_message(&mut self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let payload = payload.into();
        let state = self.state();
        let target = self
            .connection
            .as_ref()
            .filter(|_| state == CentralState::Subscribed)
            .and_then(|c| c.characteristic.map(|h| (c.peer.peer_id.clone(), h)));
        let Some((peer_id, characteristic)) = target else {
            return Err(MessengerError::NotSubscribed {
                state: state.name(),
            });
        };
        if payload.is_empty() {
            return Err(MessengerError::EmptyPayload);
        }
        if payload.len() > self.config.max_payload_len {
            return Err(MessengerError::PayloadTooLarge {
                size: payload.len(),
                max_size: self.config.max_payload_len,
            });
        }

        debug!("Writing {} bytes to {}", payload.len(), peer_id);
        self.transport.dispatch(CentralCommand::Write {
            peer_id,
            characteristic,
            payload,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    /// Advance the state machine with one radio event
    pub fn handle_event(&mut self, event: CentralEvent) {
        let state = self.state();
        debug!("Central {} <- {}", state, event.name());
        if self.absorb_stale(&event) {
            return;
        }

        match (state, event) {
            (_, CentralEvent::PowerStateChanged(radio)) => self.on_power_state(radio),

            (CentralState::PoweredOff, event) => {
                warn!("Ignoring {} while radio is {}", event.name(), self.radio);
            }

            (_, CentralEvent::PeerDiscovered { peer_id, name, rssi }) => {
                self.on_peer_discovered(peer_id, name, rssi)
            }

            (CentralState::Scanning, CentralEvent::ScanFailed { reason }) => {
                warn!("Scan failed: {}", reason);
                self.scanning = false;
                emit(&self.observer, ObserverEvent::ScanFailed { reason });
            }

            (_, CentralEvent::Disconnected { peer_id, reason }) if self.is_current(&peer_id) => {
                self.on_disconnected(peer_id, reason)
            }

            (CentralState::Connecting, CentralEvent::Connected { peer_id })
                if self.is_current(&peer_id) =>
            {
                self.on_connected(peer_id)
            }

            (CentralState::Connecting, CentralEvent::ConnectFailed { peer_id, reason })
                if self.is_current(&peer_id) =>
            {
                self.on_connect_failed(peer_id, reason)
            }

            // A cancelled attempt may be confirmed as a failure rather than a disconnect
            (CentralState::Disconnected, CentralEvent::ConnectFailed { peer_id, reason })
                if self.is_current(&peer_id) =>
            {
                self.on_disconnected(peer_id, Some(reason))
            }

            (
                CentralState::ServiceDiscovering,
                CentralEvent::ServicesDiscovered { peer_id, result },
            ) if self.is_current(&peer_id) => self.on_services_discovered(peer_id, result),

            (
                CentralState::CharacteristicDiscovering,
                CentralEvent::CharacteristicsDiscovered {
                    peer_id,
                    service_id,
                    result,
                },
            ) if self.is_current(&peer_id) && service_id == self.descriptor.service_id => {
                self.on_characteristics_discovered(peer_id, result)
            }

            (
                CentralState::Subscribed,
                CentralEvent::SubscriptionChanged {
                    peer_id, result, ..
                },
            ) if self.is_current(&peer_id) => match result {
                Ok(()) => debug!("Notifications enabled on {}", peer_id),
                Err(reason) => self.fail_connection(peer_id, reason),
            },

            (
                CentralState::Subscribed,
                CentralEvent::ValueUpdated {
                    peer_id,
                    characteristic,
                    value,
                },
            ) if self.is_current(&peer_id) => {
                self.on_value_updated(peer_id, characteristic, value)
            }

            (
                CentralState::Subscribed,
                CentralEvent::WriteAcknowledged {
                    peer_id, result, ..
                },
            ) if self.is_current(&peer_id) => self.on_write_acknowledged(peer_id, result),

            (state, event) => {
                warn!("Rejecting {} in state {}", event.name(), state);
            }
        }
    }

    /// Swallow events that belong to a link this manager already let go of.
    /// The transport ends every link with exactly one `ConnectFailed` or
    /// `Disconnected`, and raises nothing for a newer link to the same peer
    /// before it.
    fn absorb_stale(&mut self, event: &CentralEvent) -> bool {
        let Some(peer_id) = event.link_peer() else {
            return false;
        };
        let Some(pending) = self.pending_teardown.get_mut(peer_id) else {
            return false;
        };

        if event.ends_link() {
            *pending -= 1;
            if *pending == 0 {
                self.pending_teardown.remove(peer_id);
            }
            debug!("Earlier link to {} confirmed closed", peer_id);
        } else {
            debug!("Dropping {} from earlier link to {}", event.name(), peer_id);
        }
        true
    }

    fn is_current(&self, peer_id: &PeerId) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.peer_id() == peer_id)
    }

    fn on_power_state(&mut self, radio: RadioState) {
        let was_on = self.radio.is_powered_on();
        self.radio = radio;
        info!("Central radio: {}", radio);
        emit(&self.observer, ObserverEvent::RadioStateChanged(radio));

        if !radio.is_powered_on() {
            self.scanning = false;
            self.pending_teardown.clear();
            if let Some(connection) = self.connection.take() {
                emit(
                    &self.observer,
                    ObserverEvent::Disconnected {
                        peer_id: connection.peer.peer_id.clone(),
                        reason: Some(format!("radio {}", radio)),
                    },
                );
            }
            return;
        }

        if !was_on && self.config.scan_on_power_on {
            self.start_scan();
        }
    }

    fn on_peer_discovered(&mut self, peer_id: PeerId, name: Option<String>, rssi: Option<i16>) {
        let (record, is_new) = self.discovered.observe(peer_id, name.clone(), rssi);
        if is_new {
            info!(
                "Discovered {} ({}) rssi={:?}",
                record.peer_id,
                record.name_or_unknown(),
                rssi
            );
        }
        emit(
            &self.observer,
            ObserverEvent::PeerDiscovered {
                peer_id: record.peer_id.clone(),
                name: record.display_name.clone().or(name),
                rssi: record.last_seen_rssi,
            },
        );
    }

    fn on_connected(&mut self, peer_id: PeerId) {
        info!("Connected to {}", peer_id);
        emit(
            &self.observer,
            ObserverEvent::Connected {
                peer_id: peer_id.clone(),
            },
        );

        self.transport.dispatch(CentralCommand::DiscoverServices {
            peer_id,
            service_id: self.descriptor.service_id,
        });
        self.set_connection_state(ConnectionState::ServiceDiscovering);
    }

    fn on_connect_failed(&mut self, peer_id: PeerId, reason: String) {
        warn!("Failed to connect to {}: {}", peer_id, reason);
        self.connection = None;
        emit(
            &self.observer,
            ObserverEvent::ConnectFailed {
                peer_id: peer_id.clone(),
                error: MessengerError::TransportFailure { peer_id, reason },
            },
        );
    }

    fn on_disconnected(&mut self, peer_id: PeerId, reason: Option<String>) {
        info!("Disconnected from {} ({:?})", peer_id, reason);
        self.connection = None;
        emit(&self.observer, ObserverEvent::Disconnected { peer_id, reason });
    }

    fn on_services_discovered(&mut self, peer_id: PeerId, result: TransportResult<Vec<uuid::Uuid>>) {
        let services = match result {
            Ok(services) => services,
            Err(reason) => return self.fail_connection(peer_id, reason),
        };

        if !services.contains(&self.descriptor.service_id) {
            return self.mark_unusable(peer_id, format!("service {}", self.descriptor.service_id));
        }

        self.transport.dispatch(CentralCommand::DiscoverCharacteristics {
            peer_id,
            service_id: self.descriptor.service_id,
            characteristic_id: self.descriptor.characteristic_id,
        });
        self.set_connection_state(ConnectionState::CharacteristicDiscovering);
    }

    fn on_characteristics_discovered(
        &mut self,
        peer_id: PeerId,
        result: TransportResult<Vec<CharacteristicHandle>>,
    ) {
        let handles = match result {
            Ok(handles) => handles,
            Err(reason) => return self.fail_connection(peer_id, reason),
        };

        let Some(handle) = handles
            .into_iter()
            .find(|h| self.descriptor.matches(h) && h.can_write && h.can_notify)
        else {
            return self.mark_unusable(
                peer_id,
                format!(
                    "writable, notifying characteristic {}",
                    self.descriptor.characteristic_id
                ),
            );
        };

        if let Some(connection) = self.connection.as_mut() {
            connection.characteristic = Some(handle);
            connection.state = ConnectionState::Subscribed;
        }
        self.transport.dispatch(CentralCommand::Subscribe {
            peer_id: peer_id.clone(),
            characteristic: handle,
        });
        info!("Subscribed to {} on {}", handle.characteristic_id, peer_id);
        emit(&self.observer, ObserverEvent::Subscribed { peer_id });
    }

    fn on_value_updated(
        &mut self,
        peer_id: PeerId,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
    ) {
        let expected = self.connection.as_ref().and_then(|c| c.characteristic);
        if expected.map(|h| h.characteristic_id) != Some(characteristic.characteristic_id) {
            debug!(
                "Ignoring update for foreign characteristic {}",
                characteristic.characteristic_id
            );
            return;
        }

        debug!("Received {} bytes from {}", value.len(), peer_id);
        emit(
            &self.observer,
            ObserverEvent::MessageReceived {
                peer_id,
                message: Message::new(value),
            },
        );
    }

    fn on_write_acknowledged(&mut self, peer_id: PeerId, result: TransportResult<()>) {
        match result {
            Ok(()) => {
                debug!("Write acknowledged by {}", peer_id);
                emit(&self.observer, ObserverEvent::MessageSent { peer_id });
            }
            Err(reason) => {
                warn!("Write to {} failed: {}", peer_id, reason);
                emit(
                    &self.observer,
                    ObserverEvent::SendFailed {
                        peer_id: peer_id.clone(),
                        error: MessengerError::TransportFailure {
                            peer_id: peer_id.clone(),
                            reason,
                        },
                    },
                );
                self.disconnect();
            }
        }
    }

    /// Radio-level failure during setup: report and tear the link down
    fn fail_connection(&mut self, peer_id: PeerId, reason: String) {
        warn!("Discovery on {} failed: {}", peer_id, reason);
        emit(
            &self.observer,
            ObserverEvent::DiscoveryFailed {
                peer_id: peer_id.clone(),
                error: MessengerError::TransportFailure { peer_id, reason },
            },
        );
        self.disconnect();
    }

    /// Peer runs something else: keep the link, but it cannot carry messages
    fn mark_unusable(&mut self, peer_id: PeerId, expected: String) {
        warn!("Peer {} does not expose {}", peer_id, expected);
        self.set_connection_state(ConnectionState::Unusable);
        emit(
            &self.observer,
            ObserverEvent::DiscoveryFailed {
                peer_id: peer_id.clone(),
                error: MessengerError::ProtocolMismatch { peer_id, expected },
            },
        );
    }

    /// Drop the current link in favour of a new one. Its teardown is
    /// confirmed later and must not be mistaken for the new link's.
    fn replace_connection(&mut self) {
        if let Some(previous) = self.connection.take() {
            if previous.state != ConnectionState::Disconnecting {
                self.transport.dispatch(CentralCommand::Disconnect {
                    peer_id: previous.peer.peer_id.clone(),
                });
            }
            *self
                .pending_teardown
                .entry(previous.peer.peer_id.clone())
                .or_insert(0) += 1;
            emit(
                &self.observer,
                ObserverEvent::Disconnected {
                    peer_id: previous.peer.peer_id.clone(),
                    reason: Some("replaced by new connection".to_string()),
                },
            );
        }
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if let Some(connection) = self.connection.as_mut() {
            debug!(
                "Connection {}: {:?} -> {:?}",
                connection.peer.peer_id, connection.state, state
            );
            connection.state = state;
        }
    }
}
